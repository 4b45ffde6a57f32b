//! Export configuration.
//!
//! A [`Config`] is built once before a run and only read afterwards. Callers
//! tweak it through [`ConfigOverrides`], which replaces whole top-level fields
//! (a shallow merge), usually loaded from a JSON file:
//!
//! ```json
//! {
//!   "timeouts": { "page_load": 60000, "navigation_wait": 10000, "expand_settle": 1000,
//!                 "click_retry": 5000, "animation": 300, "scroll": 200, "network_idle": 500 },
//!   "strategies": ["programmatic"],
//!   "cleanup": false
//! }
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ExportError, Result};

/// Waits and timeouts, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Upper bound for a navigation, including the startup reachability check.
    pub page_load: u64,
    /// How long to wait for the top-level navigation markers to show up.
    pub navigation_wait: u64,
    /// Settle interval after a bulk expansion pass and after the whole expansion.
    pub expand_settle: u64,
    /// Upper bound for a single interaction attempt.
    pub click_retry: u64,
    /// Settle interval after a node was expanded.
    pub animation: u64,
    /// Settle interval after scrolling a control into view.
    pub scroll: u64,
    /// Quiet period with no new network resources that counts as idle.
    pub network_idle: u64,
}

impl Timeouts {
    pub fn page_load(&self) -> Duration {
        Duration::from_millis(self.page_load)
    }

    pub fn navigation_wait(&self) -> Duration {
        Duration::from_millis(self.navigation_wait)
    }

    pub fn expand_settle(&self) -> Duration {
        Duration::from_millis(self.expand_settle)
    }

    pub fn click_retry(&self) -> Duration {
        Duration::from_millis(self.click_retry)
    }

    pub fn animation(&self) -> Duration {
        Duration::from_millis(self.animation)
    }

    pub fn scroll(&self) -> Duration {
        Duration::from_millis(self.scroll)
    }

    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            page_load: 30_000,
            navigation_wait: 10_000,
            expand_settle: 1_000,
            click_retry: 5_000,
            animation: 300,
            scroll: 200,
            network_idle: 500,
        }
    }
}

/// Geometry and fidelity of every per-page PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfOptions {
    /// Paper width in CSS pixels.
    pub width_px: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub print_background: bool,
    /// Print scale; content is laid out at the printable width divided by this.
    pub scale: f64,
    /// Added to the printed content height so the last line never spills onto a second page.
    pub height_padding_px: f64,
    /// Page height used when the content region cannot be measured.
    pub fallback_height_px: f64,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            width_px: 1200.0,
            margin_top: 0.4,
            margin_right: 0.4,
            margin_bottom: 0.4,
            margin_left: 0.4,
            print_background: true,
            scale: 1.0,
            height_padding_px: 200.0,
            fallback_height_px: 1600.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1024,
        }
    }
}

/// CSS selectors describing the navigation and content DOM.
///
/// `nested_item` and `toggle` are evaluated relative to a navigation node
/// and therefore start with `:scope`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selectors {
    /// Top-level navigation nodes, in document order.
    pub section: String,
    /// Direct child nodes of a navigation node.
    pub nested_item: String,
    /// The control that expands or collapses a navigation node.
    pub toggle: String,
    /// Attribute on the toggle that reads `"true"` once the node is expanded.
    pub expanded_attribute: String,
    /// Every collapsed toggle in the navigation, used by the bulk pass.
    pub collapsed_toggle: String,
    /// Content links inside the navigation region.
    pub content_link: String,
    /// Content links anywhere in the document, used when the navigation shape is absent.
    pub fallback_link: String,
    /// The region holding the page's content.
    pub content: String,
    /// Top-level content blocks, compared against `doc_card` to detect listing pages.
    pub content_block: String,
    pub doc_card: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            section: "nav.menu ul.theme-doc-sidebar-menu > li".to_string(),
            nested_item: ":scope > ul.menu__list > li".to_string(),
            toggle: ":scope > .menu__list-item-collapsible > button.menu__caret, \
                     :scope > .menu__list-item-collapsible > a.menu__link--sublist-caret, \
                     :scope > a.menu__link--sublist-caret"
                .to_string(),
            expanded_attribute: "aria-expanded".to_string(),
            collapsed_toggle: "nav.menu .menu__list-item--collapsed > .menu__list-item-collapsible > button.menu__caret, \
                               nav.menu .menu__list-item--collapsed > .menu__list-item-collapsible > a.menu__link--sublist-caret, \
                               nav.menu .menu__list-item--collapsed > a.menu__link--sublist-caret"
                .to_string(),
            content_link: "nav.menu a.menu__link[href]:not(.menu__link--external):not(.menu__link--sublist-caret)"
                .to_string(),
            fallback_link: "a.menu__link[href]:not(.menu__link--external)".to_string(),
            content: "main article".to_string(),
            content_block: "main article section.row > *".to_string(),
            doc_card: "main article a.card".to_string(),
        }
    }
}

/// One way of activating a navigation control, tried in the configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickStrategy {
    /// A real mouse click, only when the control is visible and not covered.
    Direct,
    /// A real mouse click at the control's position, skipping the visibility checks.
    Forced,
    /// `element.click()` from script.
    Programmatic,
}

impl ClickStrategy {
    pub fn all() -> Vec<ClickStrategy> {
        vec![ClickStrategy::Direct, ClickStrategy::Forced, ClickStrategy::Programmatic]
    }
}

const DEFAULT_STYLESHEET: &str = r#"
nav.navbar, aside.theme-doc-sidebar-container, .theme-doc-toc-desktop, .theme-doc-toc-mobile,
.theme-doc-breadcrumbs, .pagination-nav, .theme-doc-footer, footer.footer {
    display: none !important;
}
.main-wrapper, main, main > .container, main .row, main .col {
    max-width: 100% !important;
    width: 100% !important;
    flex: 1 0 100% !important;
    margin: 0 !important;
}
pre, pre code {
    white-space: pre-wrap !important;
    word-break: break-word !important;
    overflow: visible !important;
}
details > div { display: block !important; height: auto !important; }
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timeouts: Timeouts,
    pub pdf: PdfOptions,
    pub viewport: Viewport,
    pub selectors: Selectors,
    pub strategies: Vec<ClickStrategy>,
    /// Injected into every page before printing.
    pub stylesheet: String,
    /// Strip hyperlinks pointing back into the site.
    pub rewrite_internal_links: bool,
    /// Deepest navigation level the expander descends into.
    pub max_depth: usize,
    pub headless: bool,
    /// Remove the temporary working area after the run.
    pub cleanup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            pdf: PdfOptions::default(),
            viewport: Viewport::default(),
            selectors: Selectors::default(),
            strategies: ClickStrategy::all(),
            stylesheet: DEFAULT_STYLESHEET.to_string(),
            rewrite_internal_links: true,
            max_depth: 16,
            headless: true,
            cleanup: true,
        }
    }
}

/// Partial configuration; every present field replaces the default wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub timeouts: Option<Timeouts>,
    pub pdf: Option<PdfOptions>,
    pub viewport: Option<Viewport>,
    pub selectors: Option<Selectors>,
    pub strategies: Option<Vec<ClickStrategy>>,
    pub stylesheet: Option<String>,
    pub rewrite_internal_links: Option<bool>,
    pub max_depth: Option<usize>,
    pub headless: Option<bool>,
    pub cleanup: Option<bool>,
}

impl ConfigOverrides {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .context("Failed to parse configuration overrides")
            .map_err(ExportError::Config)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
            .map_err(ExportError::Config)?;
        Self::from_json(&json)
    }
}

impl Config {
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(timeouts) = overrides.timeouts {
            self.timeouts = timeouts;
        }
        if let Some(pdf) = overrides.pdf {
            self.pdf = pdf;
        }
        if let Some(viewport) = overrides.viewport {
            self.viewport = viewport;
        }
        if let Some(selectors) = overrides.selectors {
            self.selectors = selectors;
        }
        if let Some(strategies) = overrides.strategies {
            self.strategies = strategies;
        }
        if let Some(stylesheet) = overrides.stylesheet {
            self.stylesheet = stylesheet;
        }
        if let Some(rewrite) = overrides.rewrite_internal_links {
            self.rewrite_internal_links = rewrite;
        }
        if let Some(max_depth) = overrides.max_depth {
            self.max_depth = max_depth;
        }
        if let Some(headless) = overrides.headless {
            self.headless = headless;
        }
        if let Some(cleanup) = overrides.cleanup {
            self.cleanup = cleanup;
        }
        self
    }
}
