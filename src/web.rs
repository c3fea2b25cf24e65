use crate::{CatalogPage, DisplayMode, DomContract, PageError, PageLinker, SearchConfig};
use askama::Template;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, info};

type SharedState = Arc<AppState>;
type CacheKey = (SearchModeParam, String, usize);
const MAX_LIMIT: usize = 100;

pub struct AppState {
    page: Mutex<CatalogPage>,
    cache: Mutex<LruCache<CacheKey, SearchResponsePayload>>,
    linker: PageLinker,
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub search: SearchConfig,
    pub contract: DomContract,
    pub linker: PageLinker,
    /// Number of API responses kept in memory.
    pub cache_capacity: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            search: SearchConfig::default(),
            contract: DomContract::default(),
            linker: PageLinker::default(),
            cache_capacity: 256,
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
    Page(PageError),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
            WebError::Page(err) => write!(f, "page error: {err}"),
        }
    }
}

impl std::error::Error for WebError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WebError::Io(err) => Some(err),
            WebError::Page(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

impl From<PageError> for WebError {
    fn from(value: PageError) -> Self {
        WebError::Page(value)
    }
}

/// Parses and loads the catalog page once; every request shares it.
pub fn build_state(markup: &str, config: &WebConfig) -> Result<SharedState, WebError> {
    let mut page = CatalogPage::parse(markup, config.contract.clone(), config.search.clone());
    page.on_load()?;
    let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
    Ok(Arc::new(AppState {
        page: Mutex::new(page),
        cache: Mutex::new(LruCache::new(capacity)),
        linker: config.linker.clone(),
    }))
}

pub async fn serve(markup: &str, config: WebConfig) -> Result<(), WebError> {
    let state = build_state(markup, &config)?;
    let router = build_router(state);
    info!(%config.addr, cache = config.cache_capacity, "Binding HTTP listener");
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(catalog_page))
        .route("/search", get(search_html))
        .route("/api/search", get(api_search))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let entries = state
        .page
        .lock()
        .session()
        .map(|session| session.catalog().len())
        .unwrap_or(0);
    Json(json!({ "status": "ok", "service": "fuzzy-catalog", "entries": entries }))
}

/// The catalog page itself, with the answers container filled for `q`.
async fn catalog_page(
    State(state): State<SharedState>,
    Query(params): Query<PageParams>,
) -> impl IntoResponse {
    let mut page = state.page.lock();
    page.on_keyup(params.q.as_deref().unwrap_or_default());
    Html(page.document().to_html())
}

async fn api_search(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponsePayload>, ApiError> {
    let (query, limit, mode) = parse_search_params(&params)?;
    Ok(Json(search(&state, &query, limit, mode)?))
}

async fn search_html(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Response {
    let payload = match parse_search_params(&params)
        .and_then(|(query, limit, mode)| search(&state, &query, limit, mode))
    {
        Ok(payload) => payload,
        Err(err) => return (err.status, Html(render_error_page(&err.message))).into_response(),
    };
    let rows = payload
        .results
        .iter()
        .map(|hit| ResultRow {
            title: &hit.title,
            href: &hit.href,
            score: hit
                .score
                .map(|score| format!("{score:.3}"))
                .unwrap_or_default(),
        })
        .collect();
    let template = SearchTemplate {
        payload: &payload,
        rows,
        browsing: payload.display == DisplayMode::Browse,
    };
    Html(
        template
            .render()
            .unwrap_or_else(|err| render_error_page(&err.to_string())),
    )
    .into_response()
}

fn search(
    state: &AppState,
    query: &str,
    limit: usize,
    mode: SearchModeParam,
) -> Result<SearchResponsePayload, ApiError> {
    let key = (mode, query.to_string(), limit);
    if let Some(hit) = state.cache.lock().get(&key) {
        debug!(query, %mode, "search cache hit");
        return Ok(hit.clone());
    }
    let payload = {
        let page = state.page.lock();
        let session = page
            .session()
            .ok_or_else(|| ApiError::unavailable("Catalog is not loaded"))?;
        let (normalized, display, answers) = match mode {
            SearchModeParam::Fuzzy => {
                let outcome = session.query(query);
                (outcome.query, outcome.mode, outcome.answers)
            }
            SearchModeParam::Substring => (
                crate::normalize_title(query),
                DisplayMode::SearchResults,
                session.search_contains(query, limit),
            ),
        };
        let results = answers
            .into_iter()
            .take(limit)
            .map(|answer| SearchHitPayload {
                href: session
                    .entry_by_id(&answer.id)
                    .map(|entry| state.linker.href(entry))
                    .unwrap_or_default(),
                id: answer.id,
                title: answer.title,
                score: answer.score,
            })
            .collect();
        SearchResponsePayload {
            query: query.to_string(),
            normalized,
            mode,
            display,
            limit,
            results,
        }
    };
    state.cache.lock().put(key, payload.clone());
    Ok(payload)
}

#[derive(Debug, Deserialize)]
struct PageParams {
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
    mode: Option<SearchModeParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchHitPayload {
    id: String,
    title: String,
    score: Option<f64>,
    href: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchResponsePayload {
    query: String,
    normalized: String,
    mode: SearchModeParam,
    display: DisplayMode,
    limit: usize,
    results: Vec<SearchHitPayload>,
}

fn parse_search_params(
    params: &SearchParams,
) -> Result<(String, usize, SearchModeParam), ApiError> {
    let query = params
        .q
        .as_ref()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("Query parameter `q` is required"))?;
    let limit = params.limit.unwrap_or(MAX_LIMIT).clamp(1, MAX_LIMIT);
    let mode = params.mode.unwrap_or_default();
    Ok((query.to_string(), limit, mode))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
enum SearchModeParam {
    #[default]
    Fuzzy,
    Substring,
}

impl fmt::Display for SearchModeParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchModeParam::Fuzzy => write!(f, "fuzzy"),
            SearchModeParam::Substring => write!(f, "substring"),
        }
    }
}

struct ResultRow<'a> {
    title: &'a str,
    href: &'a str,
    score: String,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Search: {{ payload.query }}</title>
  </head>
  <body>
    <main>
      <form action="/search" method="get">
        <input id="search" type="text" name="q" value="{{ payload.query }}">
        <select name="mode">
          <option value="fuzzy"{% if payload.mode.to_string() == "fuzzy" %} selected{% endif %}>Fuzzy</option>
          <option value="substring"{% if payload.mode.to_string() == "substring" %} selected{% endif %}>Substring</option>
        </select>
      </form>
      {% if browsing %}
      <p>Type at least three characters to search.</p>
      {% else if rows.len() == 0 %}
      <p>No titles match “{{ payload.query }}”.</p>
      {% else %}
      <ol id="answers">
        {% for row in rows %}
        <li><a href="{{ row.href }}">{{ row.title }}</a>{% if !row.score.is_empty() %} <small>{{ row.score }}</small>{% endif %}</li>
        {% endfor %}
      </ol>
      {% endif %}
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct SearchTemplate<'a> {
    payload: &'a SearchResponsePayload,
    rows: Vec<ResultRow<'a>>,
    browsing: bool,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>Error</title>
  </head>
  <body>
    <main>
      <h1>Something went wrong</h1>
      <p>{{ message }}</p>
      <a href="/">Back to the catalog</a>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct ErrorTemplate<'a> {
    message: &'a str,
}

fn render_error_page(message: &str) -> String {
    ErrorTemplate { message }
        .render()
        .unwrap_or_else(|_| "<!DOCTYPE html><title>Error</title>".to_string())
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use axum::{body, body::Body, http::Request};
    use tower::ServiceExt;

    const PAGE: &str = r#"<!DOCTYPE html><html><body>
<input id="search" type="text">
<div id="catalog">
  <div id="1" data-id="1" data-title="Amélie"><h2>Amélie</h2></div>
  <div id="2" data-id="2" data-title="Amelie Poulain" data-page="2"><h2>Amelie Poulain</h2></div>
  <div id="3" data-id="3" data-title="The Matrix" data-kind="tvshow"><h2>The Matrix</h2></div>
</div>
<div id="answers" style="display: none"></div>
</body></html>"#;

    fn test_router() -> Router {
        let state = build_state(PAGE, &WebConfig::default()).unwrap();
        build_router(state)
    }

    async fn get_body(uri: &str) -> (StatusCode, Vec<u8>) {
        let response = test_router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn health_reports_entries() {
        let (status, bytes) = get_body("/healthz").await;
        assert!(status.is_success());
        let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload["entries"], 3);
    }

    #[tokio::test]
    async fn api_search_fuzzy_amelie() {
        let (status, bytes) = get_body("/api/search?q=amelie").await;
        assert!(status.is_success());
        let payload: SearchResponsePayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload.display, DisplayMode::SearchResults);
        let titles: Vec<_> = payload.results.iter().map(|hit| hit.title.as_str()).collect();
        assert_eq!(titles, vec!["Amélie", "Amelie Poulain"]);
        assert_eq!(payload.results[0].href, "./index.html#movie_1");
        assert_eq!(payload.results[1].href, "./index_2.html#movie_2");
    }

    #[tokio::test]
    async fn api_search_substring_links_shows() {
        let (status, bytes) = get_body("/api/search?q=matr&mode=substring&limit=5").await;
        assert!(status.is_success());
        let payload: SearchResponsePayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload.results.len(), 1);
        assert_eq!(payload.results[0].href, "./index.html#tvshow_3");
        assert!(payload.results[0].score.is_none());
    }

    #[tokio::test]
    async fn api_search_short_query_browses() {
        let (_, bytes) = get_body("/api/search?q=am").await;
        let payload: SearchResponsePayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload.display, DisplayMode::Browse);
        assert!(payload.results.is_empty());
    }

    #[tokio::test]
    async fn api_search_requires_query() {
        let (status, bytes) = get_body("/api/search?q=%20").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(payload["error"].as_str().unwrap().contains("`q`"));
    }

    #[test]
    fn repeated_search_is_served_from_cache() {
        let state = build_state(PAGE, &WebConfig::default()).unwrap();
        let first = search(&state, "matrix", 10, SearchModeParam::Fuzzy).unwrap();
        assert_eq!(state.cache.lock().len(), 1);
        let second = search(&state, "matrix", 10, SearchModeParam::Fuzzy).unwrap();
        assert_eq!(state.cache.lock().len(), 1);
        assert_eq!(first.results.len(), second.results.len());
        assert_eq!(second.results[0].title, "The Matrix");
    }

    #[tokio::test]
    async fn search_page_renders_links() {
        let (status, bytes) = get_body("/search?q=amelie").await;
        assert!(status.is_success());
        let html = String::from_utf8(bytes).unwrap();
        assert!(html.contains("index_2.html#movie_2"));
        assert!(!html.contains("The Matrix"));
    }

    #[tokio::test]
    async fn catalog_page_fills_answers() {
        let (status, bytes) = get_body("/?q=matrix").await;
        assert!(status.is_success());
        let html = String::from_utf8(bytes).unwrap();
        let answers = html.split(r#"id="answers""#).nth(1).unwrap();
        assert!(answers.contains("The Matrix"));
        assert!(!answers.contains("Amélie"));
    }

    #[tokio::test]
    async fn repeated_page_requests_keep_document_bounded() {
        let state = build_state(PAGE, &WebConfig::default()).unwrap();
        let router = build_router(state.clone());
        let mut capacity = None;
        for _ in 0..200 {
            let response = router
                .clone()
                .oneshot(Request::get("/?q=amelie").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert!(response.status().is_success());
            let current = state.page.lock().document().capacity();
            assert_eq!(*capacity.get_or_insert(current), current);
        }
    }

    #[test]
    fn build_state_rejects_page_without_answers() {
        let markup = "<html><body><div id=\"catalog\"></div></body></html>";
        let err = build_state(markup, &WebConfig::default()).err().unwrap();
        assert!(matches!(err, WebError::Page(PageError::MissingElement(_))));
    }
}
