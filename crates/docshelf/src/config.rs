//! Directory configuration for the docset store
//!
//! All components take their directories from an explicit [`StoreConfig`]
//! passed at construction. Nothing is derived from the process working
//! directory, so the whole pipeline can run against temporary directories.

use std::path::{Path, PathBuf};

/// Locations of the three directories the store operates on
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one feed descriptor XML per library
    pub feeds_dir: PathBuf,
    /// Directory extracted docset bundles live in
    pub bundles_dir: PathBuf,
    /// Holding directory for in-flight archive downloads
    pub archives_dir: PathBuf,
}

impl StoreConfig {
    /// Create a config from the three store directories
    pub fn new(
        feeds_dir: impl Into<PathBuf>,
        bundles_dir: impl Into<PathBuf>,
        archives_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            feeds_dir: feeds_dir.into(),
            bundles_dir: bundles_dir.into(),
            archives_dir: archives_dir.into(),
        }
    }

    /// Root all three directories under a single base directory
    ///
    /// Convenience for tests and default server setups: `feeds/`,
    /// `docsets/` and `archives/` under `base`.
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self::new(
            base.join("feeds"),
            base.join("docsets"),
            base.join("archives"),
        )
    }
}
