//! Archive acquisition: download-URL selection, collision-safe streaming
//! download, and extraction into the bundles directory
//!
//! An acquisition is a full fetch-extract-discard pass: the archive is a
//! transient intermediate, deleted once extraction succeeds and kept for
//! diagnosis when it fails. Acquisition never short-circuits when a bundle
//! already exists on disk — duplicate-avoidance is the caller's job, and the
//! collision-safe naming below guarantees repeated runs never overwrite
//! earlier downloads.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::config::StoreConfig;
use crate::error::DocshelfError;
use crate::feed::FeedDescriptor;

/// Outcome record of one acquisition attempt
///
/// Never persisted; callers re-derive bundle state from disk afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionResult {
    /// Whether download and extraction both completed
    pub success: bool,
    /// Human-readable outcome message
    pub message: String,
    /// Directory the archive was extracted into, on success
    pub extraction_root: Option<PathBuf>,
}

impl AcquisitionResult {
    /// Record a failed attempt
    pub fn failure(err: &DocshelfError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            extraction_root: None,
        }
    }
}

/// Downloads and extracts docset archives described by feed descriptors
pub struct Acquirer {
    client: reqwest::Client,
    bundles_dir: PathBuf,
    archives_dir: PathBuf,
}

impl Acquirer {
    /// Create an acquirer with a default HTTP client
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Create an acquirer with a caller-built HTTP client
    pub fn with_client(client: reqwest::Client, config: &StoreConfig) -> Self {
        Self {
            client,
            bundles_dir: config.bundles_dir.clone(),
            archives_dir: config.archives_dir.clone(),
        }
    }

    /// Fetch and extract the newest matching archive for `feed`
    ///
    /// Every failure is converted into an [`AcquisitionResult`] here; the
    /// message distinguishes a malformed feed from a failed download from a
    /// feed offering nothing to download.
    pub async fn acquire(&self, feed: &FeedDescriptor) -> AcquisitionResult {
        match self.try_acquire(feed).await {
            Ok(root) => {
                tracing::info!(root = %root.display(), "docset downloaded and extracted");
                AcquisitionResult {
                    success: true,
                    message: "docset downloaded and extracted".to_string(),
                    extraction_root: Some(root),
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "acquisition failed");
                AcquisitionResult::failure(&err)
            }
        }
    }

    async fn try_acquire(&self, feed: &FeedDescriptor) -> Result<PathBuf, DocshelfError> {
        let url = feed.select_download_url().ok_or_else(|| {
            DocshelfError::NotFound("no download url matches a known version".to_string())
        })?;
        let archive = self.download(url).await?;
        self.extract(&archive).await?;
        // The archive is transient; extraction errors above keep it around
        // for diagnosis instead.
        tokio::fs::remove_file(&archive).await?;
        Ok(self.bundles_dir.clone())
    }

    async fn download(&self, url: &str) -> Result<PathBuf, DocshelfError> {
        let file_name = archive_file_name(url)?;
        tokio::fs::create_dir_all(&self.archives_dir).await?;
        let target = collision_free_path(&self.archives_dir, &file_name);
        tracing::debug!(url, target = %target.display(), "downloading archive");

        match self.stream_to_file(url, &target).await {
            Ok(()) => Ok(target),
            Err(err) => {
                // A truncated artifact must never survive a failed transfer.
                let _ = tokio::fs::remove_file(&target).await;
                Err(err)
            }
        }
    }

    async fn stream_to_file(&self, url: &str, target: &Path) -> Result<(), DocshelfError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DocshelfError::DownloadFailed(e.to_string()))?;

        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|e| DocshelfError::DownloadFailed(e.to_string()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| DocshelfError::DownloadFailed(e.to_string()))?;
            file.write_all(&bytes)
                .await
                .map_err(|e| DocshelfError::DownloadFailed(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| DocshelfError::DownloadFailed(e.to_string()))?;
        Ok(())
    }

    async fn extract(&self, archive: &Path) -> Result<(), DocshelfError> {
        tokio::fs::create_dir_all(&self.bundles_dir).await?;
        let archive = archive.to_path_buf();
        let dest = self.bundles_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<(), DocshelfError> {
            let file = std::fs::File::open(&archive)
                .map_err(|e| DocshelfError::ExtractionFailed(e.to_string()))?;
            let mut tarball = tar::Archive::new(flate2::read::GzDecoder::new(file));
            tarball
                .unpack(&dest)
                .map_err(|e| DocshelfError::ExtractionFailed(e.to_string()))
        })
        .await
        .map_err(|e| DocshelfError::ExtractionFailed(e.to_string()))?
    }
}

/// Target file name for a download URL: its final path segment
fn archive_file_name(url: &str) -> Result<String, DocshelfError> {
    let parsed = Url::parse(url)
        .map_err(|e| DocshelfError::DownloadFailed(format!("invalid download url: {e}")))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DocshelfError::DownloadFailed("download url has no file name".to_string()))
}

/// First path under `dir` for `file_name` that does not collide with an
/// existing file, suffixing `_<n>` before the extension until free
fn collision_free_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = name.extension().map(|e| e.to_string_lossy().into_owned());

    let mut n = 1usize;
    loop {
        let suffixed = match &extension {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(suffixed);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
