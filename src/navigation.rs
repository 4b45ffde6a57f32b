//! Expansion of collapsible navigation trees.
//!
//! The tree only exists inside the rendered page: a node's children cannot be
//! discovered until the node itself is expanded. [`NavigationExpander`] walks
//! it through the [`NavigationTree`] / [`NavigationNode`] capabilities, so the
//! walk runs the same against a live page or a fake.

use anyhow::{anyhow, Result};
use futures_util::future::{FutureExt, LocalBoxFuture};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ClickStrategy, Config, Timeouts};

/// Expansion state of a navigation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No toggle: the node never has children.
    Leaf,
    Collapsed,
    Expanded,
}

/// The navigation root as seen from the page.
#[allow(async_fn_in_trait)]
pub trait NavigationTree {
    type Node: NavigationNode;

    /// Fire every collapsed toggle currently in the tree at once. Returns how many were triggered.
    async fn expand_all_collapsed(&self) -> Result<usize>;

    async fn root_count(&self) -> Result<usize>;

    async fn root(&self, index: usize) -> Result<Self::Node>;
}

/// One node of the navigation tree, identified by its position.
#[allow(async_fn_in_trait)]
pub trait NavigationNode: Sized {
    /// Human readable position, used in log lines.
    fn describe(&self) -> String;

    async fn state(&self) -> Result<NodeState>;

    async fn child_count(&self) -> Result<usize>;

    async fn child(&self, index: usize) -> Result<Self>;

    /// Whether the toggle exists and sits inside the viewport.
    async fn control_visible(&self) -> Result<bool>;

    async fn scroll_into_view(&self) -> Result<()>;

    async fn activate(&self, strategy: ClickStrategy) -> Result<()>;
}

/// Counters describing what an expansion run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpansionReport {
    pub bulk_triggered: usize,
    pub expanded: usize,
    pub already_expanded: usize,
    pub hidden: usize,
    pub failed: usize,
    pub too_deep: usize,
}

pub struct NavigationExpander<'a> {
    timeouts: &'a Timeouts,
    strategies: &'a [ClickStrategy],
    max_depth: usize,
}

impl<'a> NavigationExpander<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            timeouts: &config.timeouts,
            strategies: &config.strategies,
            max_depth: config.max_depth,
        }
    }

    /// Best effort: every failure is logged and skipped, nothing aborts the walk.
    pub async fn expand<T: NavigationTree>(&self, tree: &T) -> ExpansionReport {
        let mut report = ExpansionReport::default();

        self.bulk_pass(tree, &mut report).await;

        match tree.root_count().await {
            Ok(count) => {
                debug!("Navigation has {} top-level sections", count);
                for index in 0..count {
                    match tree.root(index).await {
                        Ok(node) => self.expand_node(node, 1, &mut report).await,
                        Err(e) => warn!("Top-level section {} is gone: {:#}", index, e),
                    }
                }
            }
            Err(e) => warn!("Failed to count top-level sections: {:#}", e),
        }

        // Children revealed by a sibling's expansion can still be collapsed.
        self.bulk_pass(tree, &mut report).await;

        info!(
            "Navigation expanded: {} clicked, {} already open, {} hidden, {} failed",
            report.expanded, report.already_expanded, report.hidden, report.failed
        );
        report
    }

    async fn bulk_pass<T: NavigationTree>(&self, tree: &T, report: &mut ExpansionReport) {
        match tree.expand_all_collapsed().await {
            Ok(triggered) => {
                debug!("Bulk pass triggered {} toggles", triggered);
                report.bulk_triggered += triggered;
            }
            Err(e) => warn!("Bulk expansion failed: {:#}", e),
        }
        tokio::time::sleep(self.timeouts.expand_settle()).await;
    }

    fn expand_node<'n, N>(
        &'n self,
        node: N,
        depth: usize,
        report: &'n mut ExpansionReport,
    ) -> LocalBoxFuture<'n, ()>
    where
        N: NavigationNode + 'n,
    {
        async move {
            if depth > self.max_depth {
                warn!("Not descending below {} (depth {})", node.describe(), depth);
                report.too_deep += 1;
                return;
            }

            let state = match node.state().await {
                Ok(state) => state,
                Err(e) => {
                    warn!("Cannot read state of {}: {:#}", node.describe(), e);
                    report.failed += 1;
                    return;
                }
            };

            match state {
                NodeState::Leaf => return,
                NodeState::Expanded => report.already_expanded += 1,
                NodeState::Collapsed => {
                    if !self.reveal(&node).await {
                        warn!("Toggle of {} (level {}) is not visible, skipping", node.describe(), depth);
                        report.hidden += 1;
                        return;
                    }
                    if let Err(e) = self.activate(&node).await {
                        warn!("Failed to expand {} (level {}): {:#}", node.describe(), depth, e);
                        report.failed += 1;
                        return;
                    }
                    report.expanded += 1;
                    tokio::time::sleep(self.timeouts.animation()).await;
                }
            }

            let count = match node.child_count().await {
                Ok(count) => count,
                Err(e) => {
                    warn!("Cannot count children of {}: {:#}", node.describe(), e);
                    return;
                }
            };

            for index in 0..count {
                match node.child(index).await {
                    Ok(child) => self.expand_node(child, depth + 1, report).await,
                    Err(e) => warn!("Child {} of {} is gone: {:#}", index, node.describe(), e),
                }
            }
        }
        .boxed_local()
    }

    /// Scroll the toggle into view when needed. Scrolling failures are tolerated.
    async fn reveal<N: NavigationNode>(&self, node: &N) -> bool {
        if node.control_visible().await.unwrap_or(false) {
            return true;
        }
        if let Err(e) = node.scroll_into_view().await {
            debug!("Scrolling {} into view failed: {:#}", node.describe(), e);
        }
        tokio::time::sleep(self.timeouts.scroll()).await;
        node.control_visible().await.unwrap_or(false)
    }

    /// Try each strategy in order until one succeeds.
    async fn activate<N: NavigationNode>(&self, node: &N) -> Result<()> {
        let limit: Duration = self.timeouts.click_retry();

        for strategy in self.strategies {
            match tokio::time::timeout(limit, node.activate(*strategy)).await {
                Ok(Ok(())) => {
                    debug!("Expanded {} with {:?} click", node.describe(), strategy);
                    return Ok(());
                }
                Ok(Err(e)) => debug!("{:?} click on {} failed: {:#}", strategy, node.describe(), e),
                Err(_) => debug!("{:?} click on {} timed out after {:?}", strategy, node.describe(), limit),
            }
        }

        Err(anyhow!("all {} interaction strategies failed", self.strategies.len()))
    }
}
