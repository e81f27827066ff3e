//! HTTP surface of the docset service
//!
//! Thin plumbing around the docshelf library: routing, status mapping, and
//! the per-name acquisition guard. Response bodies stay generic; error
//! details go to the log, never to the client.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use docshelf::{
    base_href_for, parse_feed, plist, rewrite_document, AcquisitionResult, Acquirer,
    DocshelfError, Registry, RequestContext, StoreConfig,
};

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
    acquirer: Arc<Acquirer>,
    inflight: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AppState {
    /// Build the state over the configured store directories
    pub fn new(config: &StoreConfig, client: reqwest::Client) -> Self {
        Self {
            registry: Arc::new(Registry::new(config)),
            acquirer: Arc::new(Acquirer::with_client(client, config)),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Per-name guard so simultaneous requests for the same missing bundle
    /// do not both download it
    async fn acquisition_guard(&self, name: &str) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().await;
        inflight.entry(name.to_lowercase()).or_default().clone()
    }
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/docs/:libname", get(docs))
        .route("/files/*path", get(files))
        .route("/api/downloaded-docs", get(downloaded_docs))
        .route("/api/all-docs", get(all_docs))
        .route("/api/download/:libname", get(download))
        .with_state(state)
}

async fn docs(
    State(state): State<AppState>,
    Path(libname): Path<String>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Response {
    match serve_docs(&state, &libname, &headers, raw_query.as_deref()).await {
        Ok(html) => Html(html).into_response(),
        Err(err) => error_response(err),
    }
}

async fn serve_docs(
    state: &AppState,
    libname: &str,
    headers: &HeaderMap,
    raw_query: Option<&str>,
) -> Result<String, DocshelfError> {
    let registry = &state.registry;
    let mut folder = registry.find_bundle(libname).await?;
    if folder.is_none() {
        folder = acquire_for(state, libname).await?;
    }
    let folder = folder.ok_or_else(|| DocshelfError::NotFound(libname.to_string()))?;

    let metadata = registry.bundle_metadata(&folder).await?;
    let index = metadata
        .index_file_path
        .ok_or(DocshelfError::MetadataMissing(plist::KEY_INDEX_FILE_PATH))?;
    let document_path = registry.documents_root(&folder).join(index);

    let html = tokio::fs::read_to_string(&document_path).await?;
    let base_href = base_href_for(&document_path, registry.bundles_dir())?;
    let ctx = request_context(headers, raw_query)?;
    rewrite_document(&html, &base_href, &ctx)
}

/// Acquire the bundle matching `libname` via its feed, if one exists
///
/// The guard closes the duplicate-download race: the second waiter finds
/// the bundle on its re-check and skips the fetch.
async fn acquire_for(state: &AppState, libname: &str) -> Result<Option<String>, DocshelfError> {
    let registry = &state.registry;
    let Some(feed_path) = registry.find_feed(libname).await? else {
        return Ok(None);
    };

    let guard = state.acquisition_guard(libname).await;
    let _held = guard.lock().await;
    if let Some(folder) = registry.find_bundle(libname).await? {
        return Ok(Some(folder));
    }

    tracing::info!(libname, feed = %feed_path.display(), "downloading docset");
    let bytes = tokio::fs::read(&feed_path).await?;
    let feed = parse_feed(&bytes)?;
    let result = state.acquirer.acquire(&feed).await;
    if !result.success {
        return Err(DocshelfError::DownloadFailed(result.message));
    }
    registry.find_bundle(libname).await
}

async fn files(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Response {
    match serve_file(&state, &rest, &headers, raw_query.as_deref()).await {
        Ok(response) => response,
        Err(err) => error_response(err),
    }
}

async fn serve_file(
    state: &AppState,
    rest: &str,
    headers: &HeaderMap,
    raw_query: Option<&str>,
) -> Result<Response, DocshelfError> {
    let path = state.registry.resolve_served_path(rest)?;
    let is_html = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"));

    if is_html {
        let html = tokio::fs::read_to_string(&path).await?;
        let base_href = base_href_for(&path, state.registry.bundles_dir())?;
        let ctx = request_context(headers, raw_query)?;
        Ok(Html(rewrite_document(&html, &base_href, &ctx)?).into_response())
    } else {
        let body = tokio::fs::read(&path).await?;
        Ok(([(header::CONTENT_TYPE, content_type_for(&path))], body).into_response())
    }
}

async fn downloaded_docs(State(state): State<AppState>) -> Response {
    match state.registry.list_local().await {
        Ok(docs) => Json(json!({ "success": true, "docs": docs })).into_response(),
        Err(err) => api_error(err),
    }
}

async fn all_docs(State(state): State<AppState>) -> Response {
    match state.registry.list_all().await {
        Ok(docs) => Json(json!({ "success": true, "docs": docs })).into_response(),
        Err(err) => api_error(err),
    }
}

async fn download(State(state): State<AppState>, Path(libname): Path<String>) -> Response {
    let registry = &state.registry;
    match registry.find_bundle(&libname).await {
        Ok(Some(_)) => {
            return (StatusCode::EXPECTATION_FAILED, "Docset already exists").into_response()
        }
        Ok(None) => {}
        Err(err) => return error_response(err),
    }
    let feed_path = match registry.find_feed(&libname).await {
        Ok(Some(path)) => path,
        Ok(None) => return (StatusCode::NOT_FOUND, "Could not find docset").into_response(),
        Err(err) => return error_response(err),
    };

    let guard = state.acquisition_guard(&libname).await;
    let _held = guard.lock().await;
    if let Ok(Some(_)) = registry.find_bundle(&libname).await {
        return (StatusCode::EXPECTATION_FAILED, "Docset already exists").into_response();
    }

    tracing::info!(libname, feed = %feed_path.display(), "downloading docset");
    let result = match tokio::fs::read(&feed_path).await {
        Ok(bytes) => match parse_feed(&bytes) {
            Ok(feed) => state.acquirer.acquire(&feed).await,
            Err(err) => AcquisitionResult::failure(&err),
        },
        Err(err) => return error_response(err.into()),
    };
    (
        StatusCode::OK,
        format!("Docset downloaded: {}", result.message),
    )
        .into_response()
}

/// Context describing the inbound request for the rewriter
fn request_context(
    headers: &HeaderMap,
    raw_query: Option<&str>,
) -> Result<RequestContext, DocshelfError> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost:3000");
    let origin = Url::parse(&format!("http://{host}/"))
        .map_err(|err| DocshelfError::MalformedDocument(format!("bad host header: {err}")))?;

    let mut pairs = Vec::new();
    if let Some(raw) = raw_query {
        pairs.extend(
            url::form_urlencoded::parse(raw.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
    }
    Ok(RequestContext::new(origin).with_query(pairs))
}

fn error_response(err: DocshelfError) -> Response {
    let (status, body) = match &err {
        DocshelfError::NotFound(_) => (StatusCode::NOT_FOUND, "Could not find docset"),
        DocshelfError::InvalidPath => (StatusCode::BAD_REQUEST, "Invalid file path"),
        DocshelfError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "Not Found")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
    };
    tracing::warn!(error = %err, status = %status, "request failed");
    (status, body).into_response()
}

fn api_error(err: DocshelfError) -> Response {
    tracing::error!(error = %err, "listing failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": "Internal Server Error" })),
    )
        .into_response()
}

/// Content type for a served non-HTML file, by extension
fn content_type_for(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INFO_PLIST: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<plist version=\"1.0\">\
<dict>\
<key>dashIndexFilePath</key><string>index.html</string>\
<key>version</key><string>2.0</string>\
</dict>\
</plist>";

    const INDEX_HTML: &str = "<html><head><title>Foo</title></head>\
<body><a href=\"/guide\">guide</a></body></html>";

    fn router_over(dir: &std::path::Path) -> (Router, StoreConfig) {
        let config = StoreConfig::under(dir);
        std::fs::create_dir_all(&config.feeds_dir).unwrap();
        let state = AppState::new(&config, reqwest::Client::new());
        (router(state), config)
    }

    fn write_bundle(bundles_dir: &std::path::Path, folder: &str) {
        let documents = bundles_dir
            .join(folder)
            .join("Contents")
            .join("Resources")
            .join("Documents");
        std::fs::create_dir_all(&documents).unwrap();
        std::fs::write(
            bundles_dir.join(folder).join("Contents").join("Info.plist"),
            INFO_PLIST,
        )
        .unwrap();
        std::fs::write(documents.join("index.html"), INDEX_HTML).unwrap();
        std::fs::write(documents.join("style.css"), "body { margin: 0 }").unwrap();
    }

    fn docset_archive() -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let entries = [
            ("Foo.docset/Contents/Info.plist", INFO_PLIST),
            (
                "Foo.docset/Contents/Resources/Documents/index.html",
                INDEX_HTML,
            ),
        ];
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("host", "localhost:3000")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_content_type_for_known_extensions() {
        assert_eq!(
            content_type_for(std::path::Path::new("a/style.CSS")),
            "text/css; charset=utf-8"
        );
        assert_eq!(
            content_type_for(std::path::Path::new("img.svg")),
            "image/svg+xml"
        );
        assert_eq!(
            content_type_for(std::path::Path::new("blob.bin")),
            "application/octet-stream"
        );
        assert_eq!(
            content_type_for(std::path::Path::new("noext")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_request_context_defaults_host() {
        let ctx = request_context(&HeaderMap::new(), Some("color=red&x=1")).unwrap();
        assert_eq!(ctx.origin().as_str(), "http://localhost:3000/");
        assert_eq!(
            ctx.query(),
            &[
                ("color".to_string(), "red".to_string()),
                ("x".to_string(), "1".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_files_rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _config) = router_over(dir.path());

        let response = app
            .oneshot(get("/files/%2e%2e/etc/passwd"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "Invalid file path");
    }

    #[tokio::test]
    async fn test_files_unknown_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _config) = router_over(dir.path());

        let response = app
            .oneshot(get(
                "/files/Foo.docset/Contents/Resources/Documents/missing.html",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_files_rewrites_html_and_serves_assets_raw() {
        let dir = tempfile::tempdir().unwrap();
        let (app, config) = router_over(dir.path());
        write_bundle(&config.bundles_dir, "Foo.docset");

        let response = app
            .clone()
            .oneshot(get(
                "/files/Foo.docset/Contents/Resources/Documents/index.html?color=red",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_string(response).await;
        assert!(
            html.contains("<base href=\"/files/Foo.docset/Contents/Resources/Documents/\"/>")
        );
        assert!(html.contains("href=\"/guide?color=red\""));
        assert!(html.contains("--injected-color"));

        let response = app
            .oneshot(get("/files/Foo.docset/Contents/Resources/Documents/style.css"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/css; charset=utf-8"
        );
        assert_eq!(body_string(response).await, "body { margin: 0 }");
    }

    #[tokio::test]
    async fn test_docs_unknown_library_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _config) = router_over(dir.path());

        let response = app.oneshot(get("/docs/ruby")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Could not find docset");
    }

    #[tokio::test]
    async fn test_docs_serves_rewritten_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let (app, config) = router_over(dir.path());
        write_bundle(&config.bundles_dir, "Foo.docset");

        let response = app.oneshot(get("/docs/foo?color=red")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_string(response).await;
        assert!(
            html.contains("<base href=\"/files/Foo.docset/Contents/Resources/Documents/\"/>")
        );
        assert!(html.contains("href=\"/guide?color=red\""));
    }

    #[tokio::test]
    async fn test_docs_without_entry_point_metadata_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let (app, config) = router_over(dir.path());
        let contents = config.bundles_dir.join("Bare.docset").join("Contents");
        std::fs::create_dir_all(&contents).unwrap();
        std::fs::write(
            contents.join("Info.plist"),
            "<plist><dict><key>version</key><string>1.0</string></dict></plist>",
        )
        .unwrap();

        let response = app.oneshot(get("/docs/bare")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "Internal Server Error");
    }

    #[tokio::test]
    async fn test_api_listings() {
        let dir = tempfile::tempdir().unwrap();
        let (app, config) = router_over(dir.path());
        write_bundle(&config.bundles_dir, "Foo.docset");
        std::fs::write(
            config.feeds_dir.join("Foo.xml"),
            "<entry><version>2.0</version>\
             <url>https://cdn.example/Foo-2.0.tgz</url></entry>",
        )
        .unwrap();
        std::fs::write(
            config.feeds_dir.join("Lua.xml"),
            "<entry><version>5.4</version>\
             <url>https://cdn.example/Lua-5.4.tgz</url></entry>",
        )
        .unwrap();

        let response = app
            .clone()
            .oneshot(get("/api/downloaded-docs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["docs"][0]["name"], "Foo");
        assert_eq!(body["docs"][0]["version"], "2.0");
        assert_eq!(body["docs"][0]["downloaded"], true);

        let response = app.oneshot(get("/api/all-docs")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["docs"][0]["name"], "Foo");
        assert_eq!(body["docs"][0]["downloaded"], true);
        assert_eq!(body["docs"][1]["name"], "Lua");
        assert_eq!(body["docs"][1]["downloaded"], false);
    }

    #[tokio::test]
    async fn test_api_download_conflicts_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        let (app, config) = router_over(dir.path());
        write_bundle(&config.bundles_dir, "Foo.docset");

        let response = app.clone().oneshot(get("/api/download/foo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::EXPECTATION_FAILED);
        assert_eq!(body_string(response).await, "Docset already exists");

        let response = app.oneshot(get("/api/download/ruby")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Could not find docset");
    }

    #[tokio::test]
    async fn test_api_download_end_to_end() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/Foo-2.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(docset_archive()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (app, config) = router_over(dir.path());
        std::fs::write(
            config.feeds_dir.join("Foo.xml"),
            format!(
                "<entry>\
                 <url>{uri}/Foo-2.0.tgz</url>\
                 <other-versions><version><name>2.0</name></version></other-versions>\
                 </entry>",
                uri = mock_server.uri()
            ),
        )
        .unwrap();

        let response = app.clone().oneshot(get("/api/download/foo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.starts_with("Docset downloaded:"), "{body}");

        // The bundle is now servable
        let response = app.oneshot(get("/docs/foo?color=red")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_string(response).await;
        assert!(html.contains("href=\"/guide?color=red\""));
    }
}
