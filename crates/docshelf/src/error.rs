//! Error types for Docshelf

use thiserror::Error;

/// Errors that can occur while acquiring, listing, or serving docsets
#[derive(Debug, Error)]
pub enum DocshelfError {
    /// No feed or bundle matches a requested name, or a feed offers no
    /// usable download URL
    #[error("nothing found: {0}")]
    NotFound(String),

    /// A feed descriptor fails to parse as the expected schema
    #[error("feed malformed: {0}")]
    MalformedFeed(String),

    /// Transport error during an archive fetch; the partial file is removed
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// Archive corrupt or unwritable; the archive file is preserved
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// A requested served path escapes the bundles directory
    #[error("requested path escapes the bundles directory")]
    InvalidPath,

    /// A bundle's internal metadata lacks a required key
    #[error("bundle metadata is missing the {0:?} key")]
    MetadataMissing(&'static str),

    /// A served document cannot be tokenized for rewriting
    #[error("document malformed: {0}")]
    MalformedDocument(String),

    /// Filesystem failure; surfaced immediately, never retried
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
