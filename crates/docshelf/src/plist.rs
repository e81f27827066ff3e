//! Bundle property-list parsing
//!
//! Every docset carries a `Contents/Info.plist`: an ordered list of
//! `<key>`/value pairs inside a `<dict>`. Only two keys matter here —
//! `dashIndexFilePath` (the entry-point document) and `version` — and a
//! missing key is a normal state, not an error. The pairs are kept as an
//! explicit ordered association list so the first-key-wins rule is visible
//! and testable rather than buried in tree traversal.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::DocshelfError;

/// Property-list key naming the bundle's entry-point document
pub const KEY_INDEX_FILE_PATH: &str = "dashIndexFilePath";
/// Property-list key naming the bundle's version
pub const KEY_VERSION: &str = "version";

/// Ordered key/value pairs of a property list's outermost dict
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlistDict(Vec<(String, String)>);

impl PlistDict {
    /// First value recorded for `key`; later duplicates are ignored
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All pairs in document order
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

/// Canonical metadata extracted from a bundle folder
///
/// The bundle folder is the owning scope; metadata has no existence apart
/// from it. Both optional fields stay `None` when the property list omits
/// the corresponding key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleMetadata {
    /// Display name derived from the folder name
    pub name: String,
    /// Version string, absent when the metadata lacks a `version` key
    pub version: Option<String>,
    /// Entry-point path relative to the bundle's documents root
    pub index_file_path: Option<String>,
}

impl BundleMetadata {
    /// Derive metadata for `folder_name` from its property-list text
    pub fn from_plist(folder_name: &str, plist_text: &str) -> Result<Self, DocshelfError> {
        let dict = parse_plist(plist_text)?;
        Ok(Self {
            name: derive_name_from_bundle_folder(folder_name).to_string(),
            version: dict.first(KEY_VERSION).map(str::to_string),
            index_file_path: dict.first(KEY_INDEX_FILE_PATH).map(str::to_string),
        })
    }
}

/// Display name of a bundle folder: the substring before the first `.`
///
/// A folder named `Python.docset` derives `Python`. When splitting yields
/// no non-empty prefix the full folder name is used, so every bundle is
/// always listable.
pub fn derive_name_from_bundle_folder(folder: &str) -> &str {
    match folder.split_once('.') {
        Some((prefix, _)) if !prefix.is_empty() => prefix,
        _ => folder,
    }
}

enum Capture {
    None,
    Key(String),
    Value(String),
}

/// Parse the outermost `<dict>` of a property list into ordered pairs
///
/// Nested dicts and arrays are skipped; a document without a dict yields an
/// empty list. Fails only when the text cannot be tokenized as XML.
pub fn parse_plist(text: &str) -> Result<PlistDict, DocshelfError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    // Advance to the outermost dict; everything before it is wrapper.
    loop {
        match reader
            .read_event()
            .map_err(|e| DocshelfError::MalformedDocument(e.to_string()))?
        {
            Event::Start(e) if e.local_name().as_ref() == b"dict" => break,
            Event::Eof => return Ok(PlistDict::default()),
            _ => {}
        }
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut pending_key: Option<String> = None;
    let mut capture = Capture::None;
    let mut depth = 1usize;

    loop {
        match reader
            .read_event()
            .map_err(|e| DocshelfError::MalformedDocument(e.to_string()))?
        {
            Event::Start(e) => {
                if depth == 1 {
                    capture = match e.local_name().as_ref() {
                        b"key" => Capture::Key(String::new()),
                        // A container value discards the pending key; only
                        // scalar pairs participate in the scan.
                        b"dict" | b"array" => {
                            pending_key = None;
                            Capture::None
                        }
                        _ => Capture::Value(String::new()),
                    };
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 1 {
                    if let Some(key) = pending_key.take() {
                        match e.local_name().as_ref() {
                            b"true" => pairs.push((key, "true".to_string())),
                            b"false" => pairs.push((key, "false".to_string())),
                            _ => {}
                        }
                    }
                }
            }
            Event::Text(t) => {
                let value = t
                    .unescape()
                    .map_err(|e| DocshelfError::MalformedDocument(e.to_string()))?;
                match &mut capture {
                    Capture::Key(buf) | Capture::Value(buf) => buf.push_str(&value),
                    Capture::None => {}
                }
            }
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                if depth == 1 {
                    match std::mem::replace(&mut capture, Capture::None) {
                        Capture::Key(key) => pending_key = Some(key),
                        Capture::Value(value) => {
                            if let Some(key) = pending_key.take() {
                                pairs.push((key, value));
                            }
                        }
                        Capture::None => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(PlistDict(pairs))
}
