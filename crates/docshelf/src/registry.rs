//! Docset registry: local bundle enumeration, feed joining, and served-path
//! validation
//!
//! The registry never caches anything; every listing re-reads the feeds and
//! bundles directories so the view always matches the disk.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::config::StoreConfig;
use crate::error::DocshelfError;
use crate::feed;
use crate::plist::{self, BundleMetadata};

/// A locally extracted bundle, as reported by the JSON API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleSummary {
    /// Display name derived from the bundle folder
    pub name: String,
    /// Version from the bundle's property list, when readable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Always true for an on-disk bundle
    pub downloaded: bool,
}

/// A feed-derived entry joined with local download status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocsetListing {
    /// Name derived from the feed file
    pub name: String,
    /// Most recent version the feed advertises, when parseable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Whether a local bundle with the same derived name exists
    pub downloaded: bool,
}

/// Enumerates extracted bundles and known feeds, correlating them by name
pub struct Registry {
    feeds_dir: PathBuf,
    bundles_dir: PathBuf,
}

impl Registry {
    /// Create a registry over the configured store directories
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            feeds_dir: config.feeds_dir.clone(),
            bundles_dir: config.bundles_dir.clone(),
        }
    }

    /// Root directory bundles are extracted into
    pub fn bundles_dir(&self) -> &Path {
        &self.bundles_dir
    }

    /// Enumerate every bundle folder under the bundles directory
    ///
    /// A folder with an unreadable or malformed property list still appears,
    /// with its version absent, so every on-disk bundle is observable. A
    /// missing bundles directory (nothing acquired yet) yields an empty list.
    pub async fn list_local(&self) -> Result<Vec<BundleSummary>, DocshelfError> {
        let mut entries = match tokio::fs::read_dir(&self.bundles_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut bundles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let folder = entry.file_name().to_string_lossy().into_owned();
            bundles.push(self.summarize(&folder).await);
        }
        bundles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(bundles)
    }

    async fn summarize(&self, folder: &str) -> BundleSummary {
        let version = match tokio::fs::read_to_string(self.info_plist_path(folder)).await {
            Ok(text) => match plist::parse_plist(&text) {
                Ok(dict) => dict.first(plist::KEY_VERSION).map(str::to_string),
                Err(err) => {
                    tracing::warn!(folder, error = %err, "malformed bundle property list");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(folder, error = %err, "unreadable bundle property list");
                None
            }
        };
        BundleSummary {
            name: plist::derive_name_from_bundle_folder(folder).to_string(),
            version,
            downloaded: true,
        }
    }

    /// Enumerate every known feed, flagging which ones exist locally
    ///
    /// Local names are indexed once per call; the join is then a map lookup
    /// per feed. A feed that fails to parse is still listed (version absent)
    /// so one bad descriptor cannot hide the rest.
    pub async fn list_all(&self) -> Result<Vec<DocsetListing>, DocshelfError> {
        let local: HashMap<String, BundleSummary> = self
            .list_local()
            .await?
            .into_iter()
            .map(|summary| (summary.name.clone(), summary))
            .collect();

        let mut entries = tokio::fs::read_dir(&self.feeds_dir).await?;
        let mut listings = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("xml") {
                continue;
            }
            let name = feed::derive_name_from_feed_file(&path);
            let version = match tokio::fs::read(&path).await {
                Ok(bytes) => match feed::parse_feed(&bytes) {
                    Ok(descriptor) => descriptor.latest_version().map(str::to_string),
                    Err(err) => {
                        tracing::warn!(feed = %path.display(), error = %err, "malformed feed");
                        None
                    }
                },
                Err(err) => {
                    tracing::warn!(feed = %path.display(), error = %err, "unreadable feed");
                    None
                }
            };
            let downloaded = local.contains_key(&name);
            listings.push(DocsetListing {
                name,
                version,
                downloaded,
            });
        }
        listings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listings)
    }

    /// First bundle folder whose name contains `libname`
    /// (case-insensitive) and carries the `.docset` extension
    pub async fn find_bundle(&self, libname: &str) -> Result<Option<String>, DocshelfError> {
        let needle = libname.to_lowercase();
        let mut entries = match tokio::fs::read_dir(&self.bundles_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let folder = entry.file_name().to_string_lossy().into_owned();
            let lower = folder.to_lowercase();
            if lower.ends_with(".docset") && lower.contains(&needle) {
                return Ok(Some(folder));
            }
        }
        Ok(None)
    }

    /// First feed file whose name contains `libname` (case-insensitive)
    pub async fn find_feed(&self, libname: &str) -> Result<Option<PathBuf>, DocshelfError> {
        let needle = libname.to_lowercase();
        let mut entries = tokio::fs::read_dir(&self.feeds_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let lower = file_name.to_lowercase();
            if lower.ends_with(".xml") && lower.contains(&needle) {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Path of a bundle's internal property list
    pub fn info_plist_path(&self, folder: &str) -> PathBuf {
        self.bundles_dir
            .join(folder)
            .join("Contents")
            .join("Info.plist")
    }

    /// Servable document root of a bundle
    pub fn documents_root(&self, folder: &str) -> PathBuf {
        self.bundles_dir
            .join(folder)
            .join("Contents")
            .join("Resources")
            .join("Documents")
    }

    /// Read and parse a bundle's metadata
    pub async fn bundle_metadata(&self, folder: &str) -> Result<BundleMetadata, DocshelfError> {
        let text = tokio::fs::read_to_string(self.info_plist_path(folder)).await?;
        BundleMetadata::from_plist(folder, &text)
    }

    /// Resolve a served file request against the bundles root
    ///
    /// Rejects any parent-directory, root, or prefix component, and any
    /// result escaping the bundles directory, before a single byte is read.
    pub fn resolve_served_path(&self, requested: &str) -> Result<PathBuf, DocshelfError> {
        let relative = Path::new(requested);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(DocshelfError::InvalidPath),
            }
        }
        let resolved = self.bundles_dir.join(relative);
        if !resolved.starts_with(&self.bundles_dir) {
            return Err(DocshelfError::InvalidPath);
        }
        Ok(resolved)
    }
}
