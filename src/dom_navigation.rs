//! [`NavigationTree`] backed by the live page.
//!
//! Nodes are addressed by their index path from the top-level sections; every
//! call resolves the path again, so a node handle stays valid while the DOM
//! around it re-renders.

use anyhow::{anyhow, Context, Result};
use chromiumoxide::Page;
use serde::de::DeserializeOwned;

use crate::browser::{eval, js_string};
use crate::config::{ClickStrategy, Selectors};
use crate::navigation::{NavigationNode, NavigationTree, NodeState};

const TARGET_ATTRIBUTE: &str = "data-docs2pdf-target";

pub struct DomNavigation<'a> {
    page: &'a Page,
    selectors: &'a Selectors,
}

impl<'a> DomNavigation<'a> {
    pub fn new(page: &'a Page, selectors: &'a Selectors) -> Self {
        Self { page, selectors }
    }
}

impl<'a> NavigationTree for DomNavigation<'a> {
    type Node = DomNode<'a>;

    async fn expand_all_collapsed(&self) -> Result<usize> {
        let script = format!(
            r#"(() => {{
                const toggles = document.querySelectorAll({collapsed});
                for (const toggle of toggles) {{
                    try {{ toggle.click(); }} catch (_) {{}}
                }}
                return toggles.length;
            }})()"#,
            collapsed = js_string(&self.selectors.collapsed_toggle),
        );
        eval(self.page, &script).await
    }

    async fn root_count(&self) -> Result<usize> {
        let script = format!(
            "document.querySelectorAll({}).length",
            js_string(&self.selectors.section)
        );
        eval(self.page, &script).await
    }

    async fn root(&self, index: usize) -> Result<DomNode<'a>> {
        let node = DomNode {
            page: self.page,
            selectors: self.selectors,
            path: vec![index],
        };
        node.ensure_exists().await?;
        Ok(node)
    }
}

pub struct DomNode<'a> {
    page: &'a Page,
    selectors: &'a Selectors,
    path: Vec<usize>,
}

impl DomNode<'_> {
    /// Run `body` with `node` and `toggle` bound to this node's element and
    /// its toggle (possibly null). A vanished node evaluates to null.
    async fn with_node<T: DeserializeOwned>(&self, body: &str) -> Result<T> {
        let path = serde_json::to_string(&self.path)?;
        let script = format!(
            r#"(() => {{
                const path = {path};
                let node = document.querySelectorAll({section})[path[0]];
                for (let i = 1; node && i < path.length; i++) {{
                    node = node.querySelectorAll({nested})[path[i]];
                }}
                if (!node) return null;
                const toggle = node.querySelector({toggle});
                {body}
            }})()"#,
            section = js_string(&self.selectors.section),
            nested = js_string(&self.selectors.nested_item),
            toggle = js_string(&self.selectors.toggle),
        );
        let value: Option<T> = eval(self.page, &script).await?;
        value.ok_or_else(|| anyhow!("navigation node {} not found", self.describe()))
    }

    async fn ensure_exists(&self) -> Result<()> {
        self.with_node::<bool>("return true;").await.map(|_| ())
    }

    /// Tag the toggle so it can be looked up by selector for a real click.
    async fn mark_toggle(&self, check_actionable: bool) -> Result<()> {
        let body = format!(
            r#"if (!toggle) return 'missing';
            document.querySelectorAll('[{attr}]').forEach(e => e.removeAttribute('{attr}'));
            if ({check}) {{
                const rect = toggle.getBoundingClientRect();
                if (rect.width === 0 || rect.height === 0) return 'invisible';
                const hit = document.elementFromPoint(rect.left + rect.width / 2, rect.top + rect.height / 2);
                if (!hit || !(hit === toggle || toggle.contains(hit))) return 'occluded';
            }}
            toggle.setAttribute('{attr}', '1');
            return 'ok';"#,
            attr = TARGET_ATTRIBUTE,
            check = check_actionable,
        );
        match self.with_node::<String>(&body).await?.as_str() {
            "ok" => Ok(()),
            other => Err(anyhow!("toggle of {} is {}", self.describe(), other)),
        }
    }

    async fn click_marked(&self) -> Result<()> {
        let element = self
            .page
            .find_element(format!("[{}]", TARGET_ATTRIBUTE))
            .await
            .context("Marked toggle not found")?;
        element.click().await.context("Click failed")?;
        Ok(())
    }
}

impl NavigationNode for DomNode<'_> {
    fn describe(&self) -> String {
        let path: Vec<String> = self.path.iter().map(|i| (i + 1).to_string()).collect();
        format!("nav[{}]", path.join("."))
    }

    async fn state(&self) -> Result<NodeState> {
        let body = format!(
            r#"if (!toggle) return 'leaf';
            return toggle.getAttribute({attr}) === 'true' ? 'expanded' : 'collapsed';"#,
            attr = js_string(&self.selectors.expanded_attribute),
        );
        Ok(match self.with_node::<String>(&body).await?.as_str() {
            "leaf" => NodeState::Leaf,
            "expanded" => NodeState::Expanded,
            _ => NodeState::Collapsed,
        })
    }

    async fn child_count(&self) -> Result<usize> {
        let body = format!(
            "return node.querySelectorAll({}).length;",
            js_string(&self.selectors.nested_item)
        );
        self.with_node(&body).await
    }

    async fn child(&self, index: usize) -> Result<Self> {
        let mut path = self.path.clone();
        path.push(index);
        let child = DomNode {
            page: self.page,
            selectors: self.selectors,
            path,
        };
        child.ensure_exists().await?;
        Ok(child)
    }

    async fn control_visible(&self) -> Result<bool> {
        self.with_node(
            r#"if (!toggle) return false;
            const rect = toggle.getBoundingClientRect();
            const style = getComputedStyle(toggle);
            return rect.width > 0 && rect.height > 0
                && style.visibility !== 'hidden' && style.display !== 'none'
                && rect.bottom > 0 && rect.right > 0
                && rect.top < window.innerHeight && rect.left < window.innerWidth;"#,
        )
        .await
    }

    async fn scroll_into_view(&self) -> Result<()> {
        let done: bool = self
            .with_node(
                r#"if (!toggle) return false;
                toggle.scrollIntoView({ block: 'center', inline: 'nearest' });
                return true;"#,
            )
            .await?;
        if done {
            Ok(())
        } else {
            Err(anyhow!("{} has no toggle to scroll to", self.describe()))
        }
    }

    async fn activate(&self, strategy: ClickStrategy) -> Result<()> {
        match strategy {
            ClickStrategy::Direct => {
                self.mark_toggle(true).await?;
                self.click_marked().await
            }
            ClickStrategy::Forced => {
                self.mark_toggle(false).await?;
                self.click_marked().await
            }
            ClickStrategy::Programmatic => {
                let clicked: bool = self
                    .with_node("if (!toggle) return false; toggle.click(); return true;")
                    .await?;
                if clicked {
                    Ok(())
                } else {
                    Err(anyhow!("{} has no toggle", self.describe()))
                }
            }
        }
    }
}
