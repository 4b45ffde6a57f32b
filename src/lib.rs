//! # docs2pdf
//!
//! Export a documentation website into a single PDF with bookmarks.
//!
//! The pipeline runs in one browser tab, strictly in order:
//!
//! - expand every collapsible section of the sidebar and collect the page links
//! - render each page to its own PDF, sized to its content, skipping listing pages
//! - concatenate the page PDFs and rebuild a bookmark outline from the page headings
//!
//! Pages that fail to render are skipped with a warning; the run only fails
//! when the site is unreachable or nothing could be exported.
//!
//! ## Usage
//!
//! ```bash
//! docs2pdf export https://docusaurus.io/docs -o docusaurus.pdf
//! ```

mod browser;
mod collector;
mod config;
mod dom_navigation;
mod error;
mod exporter;
mod navigation;
mod outline;
mod pdf_merger;
mod renderer;
mod workspace;

pub use collector::{extract_links, LinkCollector};
pub use config::{ClickStrategy, Config, ConfigOverrides, PdfOptions, Selectors, Timeouts, Viewport};
pub use dom_navigation::{DomNavigation, DomNode};
pub use error::{ExportError, Result};
pub use exporter::{default_output_name, export, export_with_overrides, Exporter};
pub use navigation::{ExpansionReport, NavigationExpander, NavigationNode, NavigationTree, NodeState};
pub use outline::{BookmarkNode, OutlineTree};
pub use pdf_merger::{assemble, AssemblyReport, PdfMerger};
pub use renderer::{
    extract_headings, is_listing_page, render_all, BrowserRenderer, ExportedPage, PageGeometry, PageHeading,
    PageRenderer, RenderOutcome,
};
pub use workspace::{ensure_dir, remove_dir, Workspace};
