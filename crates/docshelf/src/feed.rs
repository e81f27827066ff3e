//! Feed descriptor parsing and download-URL selection
//!
//! A feed is one XML document per library: a root element carrying candidate
//! download `<url>` nodes and a version history, most recent first. The file
//! stem is the canonical name used to correlate feeds with extracted bundles.

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::DocshelfError;

/// One entry of a feed's version history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedVersion {
    /// Version label, e.g. `2.0`
    pub name: String,
    /// Version-specific download URL; empty when the feed only lists a label
    pub url: String,
}

/// Parsed feed descriptor
///
/// Immutable once parsed; feeds are re-read from disk on every use rather
/// than cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescriptor {
    /// Candidate download URLs, in document order
    pub urls: Vec<String>,
    /// Version history, most recent first
    pub versions: Vec<FeedVersion>,
}

impl FeedDescriptor {
    /// Label of the most recent version entry, if any
    pub fn latest_version(&self) -> Option<&str> {
        self.versions
            .iter()
            .map(|v| v.name.as_str())
            .find(|name| !name.is_empty())
    }

    /// Pick the download URL for the newest version
    ///
    /// Walks the version history most-recent-first and returns the first
    /// candidate URL containing that version's label as a substring,
    /// checking the shared candidate list before the version entry's own
    /// URL. This is a literal, order-sensitive heuristic; there is no
    /// semver comparison.
    pub fn select_download_url(&self) -> Option<&str> {
        for version in &self.versions {
            if version.name.is_empty() {
                continue;
            }
            if let Some(url) = self.urls.iter().find(|u| u.contains(&version.name)) {
                return Some(url);
            }
            if !version.url.is_empty() && version.url.contains(&version.name) {
                return Some(&version.url);
            }
        }
        None
    }
}

/// Canonical cross-referencing key for a feed file: its stem, extension
/// stripped
pub fn derive_name_from_feed_file(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn is_other_versions(name: &[u8]) -> bool {
    // Both spellings occur in the wild
    name == b"other-versions" || name == b"otherVersions"
}

/// Parse a feed descriptor document
///
/// Fails with [`DocshelfError::MalformedFeed`] when the bytes are not XML,
/// there is no root element, or the document yields neither url nor version
/// nodes.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedDescriptor, DocshelfError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| DocshelfError::MalformedFeed("feed is not valid UTF-8".to_string()))?;

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut urls: Vec<String> = Vec::new();
    let mut versions: Vec<FeedVersion> = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut saw_root = false;
    let mut pending_name: Option<String> = None;
    let mut pending_url: Option<String> = None;

    loop {
        match reader
            .read_event()
            .map_err(|e| DocshelfError::MalformedFeed(e.to_string()))?
        {
            Event::Eof => break,
            Event::Start(e) => {
                saw_root = true;
                stack.push(e.local_name().as_ref().to_vec());
            }
            Event::End(_) => {
                let closed = stack.pop();
                // Leaving a <version> inside the history list flushes the
                // pending {name, url} pair.
                if closed.as_deref() == Some(b"version")
                    && stack.last().is_some_and(|parent| is_other_versions(parent))
                {
                    if let Some(name) = pending_name.take() {
                        versions.push(FeedVersion {
                            name,
                            url: pending_url.take().unwrap_or_default(),
                        });
                    }
                    pending_url = None;
                }
            }
            Event::Text(t) => {
                let value = t
                    .unescape()
                    .map_err(|e| DocshelfError::MalformedFeed(e.to_string()))?;
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                match stack.as_slice() {
                    // <root><url>...</url></root>
                    [_, tag] if tag == b"url" => urls.push(value.to_string()),
                    // <root><version>label</version></root> — the current
                    // version label, which precedes the history list and so
                    // lands first (most recent) in document order
                    [_, tag] if tag == b"version" => versions.push(FeedVersion {
                        name: value.to_string(),
                        url: String::new(),
                    }),
                    // <root><other-versions><version><name>/<url>
                    [_, list, entry, field]
                        if is_other_versions(list) && entry == b"version" =>
                    {
                        if field == b"name" {
                            pending_name.get_or_insert_with(|| value.to_string());
                        } else if field == b"url" {
                            pending_url.get_or_insert_with(|| value.to_string());
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(DocshelfError::MalformedFeed(
            "missing root element".to_string(),
        ));
    }
    if urls.is_empty() && versions.is_empty() {
        return Err(DocshelfError::MalformedFeed(
            "no url or version nodes".to_string(),
        ));
    }

    Ok(FeedDescriptor { urls, versions })
}
