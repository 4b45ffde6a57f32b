//! Fatal error taxonomy for an export run.
//!
//! Anything that can be absorbed (a single navigation node, a single page,
//! a single artifact, the outline) is logged where it happens and never
//! reaches this type.

use std::path::PathBuf;

/// A condition that aborts the whole export.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The source URL could not be parsed.
    #[error("invalid URL")]
    InvalidUrl(#[from] url::ParseError),

    /// The headless browser could not be launched or a page context opened.
    #[error("failed to start browser")]
    Browser(#[source] anyhow::Error),

    /// The target site did not answer within the page-load timeout.
    #[error("target site {url} is unreachable")]
    Connectivity {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// Link extraction could not run at all.
    #[error("could not collect links from {url}")]
    Collection {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// No page survived rendering, or no artifact could be loaded.
    #[error("no pages were exported; nothing to merge")]
    NothingToMerge,

    /// The merged document could not be written.
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The temporary working directory could not be created.
    #[error("failed to prepare working directory")]
    Workspace(#[source] anyhow::Error),

    /// Configuration overrides could not be read or parsed.
    #[error("invalid configuration")]
    Config(#[source] anyhow::Error),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;
