//! Served-document rewriting: base-URL insertion, query propagation onto
//! hyperlinks, and theming runtime injection
//!
//! The rewrite operates on an in-memory event stream and returns serialized
//! markup; the file on disk is never touched. Events that are not rewritten
//! pass through byte-for-byte, so the same document with the same request
//! context always produces identical output.

use std::path::Path;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use url::Url;

use crate::error::DocshelfError;

/// Runtime fragment injected into every served document's head: reads the
/// page's own query string at load time and applies each key as a CSS
/// custom property on the document root and body. The reserved key `color`
/// maps to `--injected-color`.
const THEME_RUNTIME_JS: &str = "(function () {\
 var apply = function () {\
 var params = new URLSearchParams(window.location.search);\
 params.forEach(function (value, key) {\
 var property = key === \"color\" ? \"--injected-color\" : \"--\" + key;\
 document.documentElement.style.setProperty(property, value);\
 if (document.body) { document.body.style.setProperty(property, value); }\
 });\
 };\
 if (document.readyState === \"loading\") {\
 document.addEventListener(\"DOMContentLoaded\", apply);\
 } else { apply(); }\
 })();";

/// Style rules driving foreground color from the injected custom property.
/// SVG content, syntax-highlighting tokens, and elements opted out via
/// `data-no-injected-color` keep their own colors.
const THEME_STYLE_CSS: &str = "\
 body:not([data-no-injected-color]) {\
 color: var(--injected-color, inherit);\
 background-color: transparent;\
 }\
 body :not(svg):not(svg *):not(.hljs):not(.hljs *):not([data-no-injected-color]) {\
 color: var(--injected-color, inherit);\
 background-color: transparent;\
 }";

/// The inbound request a document is being rewritten for
#[derive(Debug, Clone)]
pub struct RequestContext {
    origin: Url,
    query: Vec<(String, String)>,
}

impl RequestContext {
    /// Context for a request origin, with no query parameters
    ///
    /// Only the scheme and host of `origin` are kept; path, query, and
    /// fragment are discarded.
    pub fn new(mut origin: Url) -> Self {
        origin.set_path("/");
        origin.set_query(None);
        origin.set_fragment(None);
        Self {
            origin,
            query: Vec::new(),
        }
    }

    /// Context carrying the full inbound request URL's query pairs
    pub fn from_request_url(url: &Url) -> Self {
        let query = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self {
            query,
            ..Self::new(url.clone())
        }
    }

    /// Add query pairs to propagate onto every hyperlink
    pub fn with_query(mut self, pairs: Vec<(String, String)>) -> Self {
        self.query = pairs;
        self
    }

    /// The request origin (scheme + host, path `/`)
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// The inbound query pairs, in order
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }
}

/// Base href for a served document: its parent directory, relative to the
/// bundles root, behind the file-serving boundary
pub fn base_href_for(document_path: &Path, bundles_dir: &Path) -> Result<String, DocshelfError> {
    let parent = document_path.parent().ok_or(DocshelfError::InvalidPath)?;
    let relative = parent
        .strip_prefix(bundles_dir)
        .map_err(|_| DocshelfError::InvalidPath)?;

    let mut href = String::from("/files");
    for component in relative.components() {
        href.push('/');
        href.push_str(&component.as_os_str().to_string_lossy());
    }
    href.push('/');
    Ok(href)
}

/// Rewrite a served document for embedding
///
/// Prepends a `<base>` element into the head, propagates the inbound query
/// pairs onto every hyperlink, and appends the theming runtime and style
/// rules at the end of the head. Documents without a head still get their
/// hyperlinks rewritten.
pub fn rewrite_document(
    html: &str,
    base_href: &str,
    ctx: &RequestContext,
) -> Result<String, DocshelfError> {
    let mut reader = Reader::from_str(html);
    let config = reader.config_mut();
    // Docset pages are HTML, not XML: unmatched and unclosed tags are normal.
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut writer = Writer::new(Vec::new());
    let mut base_inserted = false;
    let mut runtime_injected = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DocshelfError::MalformedDocument(e.to_string()))?;
        match event {
            Event::Eof => break,
            Event::Start(e) if !base_inserted && tag_is(&e, b"head") => {
                emit(&mut writer, Event::Start(e))?;
                let mut base = BytesStart::new("base");
                base.push_attribute(("href", base_href));
                emit(&mut writer, Event::Empty(base))?;
                base_inserted = true;
            }
            Event::End(e) if !runtime_injected && e.name().as_ref().eq_ignore_ascii_case(b"head") => {
                write_theme_runtime(&mut writer)?;
                runtime_injected = true;
                emit(&mut writer, Event::End(e))?;
            }
            Event::Start(e) if tag_is(&e, b"a") => match rewrite_anchor(&e, ctx)? {
                Some(rebuilt) => emit(&mut writer, Event::Start(rebuilt))?,
                None => emit(&mut writer, Event::Start(e))?,
            },
            Event::Empty(e) if tag_is(&e, b"a") => match rewrite_anchor(&e, ctx)? {
                Some(rebuilt) => emit(&mut writer, Event::Empty(rebuilt))?,
                None => emit(&mut writer, Event::Empty(e))?,
            },
            other => emit(&mut writer, other)?,
        }
    }

    String::from_utf8(writer.into_inner())
        .map_err(|e| DocshelfError::MalformedDocument(e.to_string()))
}

fn tag_is(e: &BytesStart<'_>, name: &[u8]) -> bool {
    e.name().as_ref().eq_ignore_ascii_case(name)
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), DocshelfError> {
    writer
        .write_event(event)
        .map_err(|e| DocshelfError::MalformedDocument(e.to_string()))
}

fn write_theme_runtime(writer: &mut Writer<Vec<u8>>) -> Result<(), DocshelfError> {
    emit(writer, Event::Start(BytesStart::new("script")))?;
    emit(writer, Event::Text(BytesText::from_escaped(THEME_RUNTIME_JS)))?;
    emit(writer, Event::End(BytesEnd::new("script")))?;
    emit(writer, Event::Start(BytesStart::new("style")))?;
    emit(writer, Event::Text(BytesText::from_escaped(THEME_STYLE_CSS)))?;
    emit(writer, Event::End(BytesEnd::new("style")))?;
    Ok(())
}

/// Rebuild an anchor with the inbound query propagated onto its href
///
/// Returns `None` when the anchor needs no change, so untouched anchors
/// pass through byte-for-byte.
fn rewrite_anchor(
    e: &BytesStart<'_>,
    ctx: &RequestContext,
) -> Result<Option<BytesStart<'static>>, DocshelfError> {
    let mut new_href: Option<String> = None;
    for attr in e.attributes().with_checks(false).flatten() {
        if attr.key.as_ref().eq_ignore_ascii_case(b"href") {
            let href = attr
                .unescape_value()
                .map_err(|err| DocshelfError::MalformedDocument(err.to_string()))?;
            new_href = propagate_query(&href, ctx);
            break;
        }
    }
    let Some(new_href) = new_href else {
        return Ok(None);
    };

    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut rebuilt = BytesStart::new(name);
    let mut replaced = false;
    for attr in e.attributes().with_checks(false).flatten() {
        if !replaced && attr.key.as_ref().eq_ignore_ascii_case(b"href") {
            rebuilt.push_attribute(("href", new_href.as_str()));
            replaced = true;
        } else {
            rebuilt.push_attribute(attr);
        }
    }
    Ok(Some(rebuilt))
}

/// Resolve a hyperlink against the request origin and append the inbound
/// query pairs, keeping any parameters already on the link
///
/// Same-origin results serialize root-relative so no origin is hardcoded
/// into rewritten links; foreign origins stay absolute. Fragment-only and
/// non-http(s) hrefs are left alone. Returns `None` when the href would be
/// unchanged.
fn propagate_query(href: &str, ctx: &RequestContext) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let mut resolved = ctx.origin.join(trimmed).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }

    if !ctx.query.is_empty() {
        let mut pairs = resolved.query_pairs_mut();
        for (key, value) in &ctx.query {
            pairs.append_pair(key, value);
        }
    }

    let rewritten = if resolved.origin() == ctx.origin.origin() {
        let mut out = resolved.path().to_string();
        if let Some(query) = resolved.query() {
            out.push('?');
            out.push_str(query);
        }
        if let Some(fragment) = resolved.fragment() {
            out.push('#');
            out.push_str(fragment);
        }
        out
    } else {
        String::from(resolved)
    };

    if rewritten == href {
        None
    } else {
        Some(rewritten)
    }
}
