use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::cache::{CacheLookup, Freshness};
use crate::error::AppError;
use crate::exchange::ExchangeId;
use crate::render::{self, PageView, STALE_NOTICE};
use crate::state::AppState;

const SCAN_STATUS: HeaderName = HeaderName::from_static("x-scan-status");
const REFRESHED_AT: HeaderName = HeaderName::from_static("x-refreshed-at");
const SCAN_NOTICE: HeaderName = HeaderName::from_static("x-scan-notice");

// ── Query params ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    #[serde(default)]
    exchange: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    refresh: bool,
}

/// Accepts `true`/`1`/`yes`/`on` the way form submissions send them.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
        .unwrap_or(false))
}

// ── Route definitions ────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(results_page))
        .route("/results", get(results_page))
        .route("/exchanges", get(list_exchanges))
        .route("/scan", get(scan).post(force_scan))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /exchanges: supported exchange ids.
async fn list_exchanges() -> Json<Vec<&'static str>> {
    Json(ExchangeId::ALL.iter().map(|id| id.as_str()).collect())
}

/// GET /scan: ranked rows as JSON, refreshed when stale or `refresh` is set.
async fn scan(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ScanQuery>,
) -> Result<Response, AppError> {
    run_scan(&state, q.exchange.as_deref(), q.refresh).await
}

/// POST /scan: always refreshes.
async fn force_scan(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ScanQuery>,
) -> Result<Response, AppError> {
    run_scan(&state, q.exchange.as_deref(), true).await
}

async fn run_scan(state: &AppState, exchange: Option<&str>, force: bool) -> Result<Response, AppError> {
    let exchange = state.resolve_exchange(exchange)?;
    let lookup = state.cache.get_or_refresh(exchange, Utc::now(), force).await?;
    Ok((scan_headers(&lookup), Json(&lookup.entry.result.rows)).into_response())
}

fn scan_headers(lookup: &CacheLookup) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(SCAN_STATUS, HeaderValue::from_static(lookup.freshness.label()));
    if let Ok(value) = HeaderValue::from_str(&lookup.entry.refreshed_at.to_rfc3339()) {
        headers.insert(REFRESHED_AT, value);
    }
    if let Freshness::Stale { reason } = &lookup.freshness {
        let notice = format!("{STALE_NOTICE} ({reason})");
        let value = HeaderValue::from_str(&notice)
            .unwrap_or_else(|_| HeaderValue::from_static(STALE_NOTICE));
        headers.insert(SCAN_NOTICE, value);
    }
    headers
}

/// GET / and GET /results: the dashboard page.
async fn results_page(State(state): State<Arc<AppState>>, Query(q): Query<ScanQuery>) -> Response {
    let reload_secs = state.cache.staleness().num_seconds();

    let exchange = match state.resolve_exchange(q.exchange.as_deref()) {
        Ok(exchange) => exchange,
        Err(err) => {
            let err = AppError::from(err);
            let message = err.message();
            let view = PageView {
                selected: state.config.scan.default_exchange,
                lookup: None,
                error: Some(&message),
                reload_secs,
            };
            return (err.status(), Html(render::page(&view))).into_response();
        }
    };

    match state.cache.get_or_refresh(exchange, Utc::now(), q.refresh).await {
        Ok(lookup) => {
            let view = PageView {
                selected: exchange,
                lookup: Some(&lookup),
                error: None,
                reload_secs,
            };
            Html(render::page(&view)).into_response()
        }
        Err(err) => {
            let err = AppError::from(err);
            let message = err.message();
            let view = PageView {
                selected: exchange,
                lookup: None,
                error: Some(&message),
                reload_secs,
            };
            (err.status(), Html(render::page(&view))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Scanner;
    use crate::analysis::tests::FakeSource;
    use crate::config::AppConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn app(source: FakeSource) -> (Router, Arc<FakeSource>) {
        let source = Arc::new(source);
        let config = AppConfig::default();
        let job = Arc::new(Scanner::new(
            Arc::clone(&source),
            config.scan.clone(),
            config.indicators,
        ));
        let state = AppState::new(config, job);
        (router(state), source)
    }

    fn bybit() -> FakeSource {
        FakeSource::with_pairs(ExchangeId::Bybit, &["AAA", "BBB", "CCC"])
    }

    async fn send(router: &Router, method: Method, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        router.clone().oneshot(request).await.unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn lists_supported_exchanges() {
        let (router, _) = app(bybit());
        let response = send(&router, Method::GET, "/exchanges").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, json!(["binance", "bybit", "okx", "kucoin", "gate", "mexc"]));
    }

    #[tokio::test]
    async fn unsupported_exchange_is_rejected_before_any_fetch() {
        let (router, source) = app(bybit());
        let response = send(&router, Method::GET, "/scan?exchange=ftx").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "unsupported exchange: ftx");

        let page = send(&router, Method::GET, "/results?exchange=ftx").await;
        assert_eq!(page.status(), StatusCode::BAD_REQUEST);

        assert_eq!(source.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(source.candle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scan_returns_rows_and_caches_them() {
        let (router, source) = app(bybit());

        let first = send(&router, Method::GET, "/scan?exchange=bybit").await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[&SCAN_STATUS], "refreshed");
        assert!(first.headers().contains_key(&REFRESHED_AT));
        let rows = body_json(first).await;
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["rank"], 1);
        assert_eq!(rows[0]["symbol"], "CCC/USDT");

        let second = send(&router, Method::GET, "/scan").await;
        assert_eq!(second.headers()[&SCAN_STATUS], "cached");
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_flag_and_post_force_a_new_scan() {
        let (router, source) = app(bybit());

        send(&router, Method::GET, "/scan?exchange=bybit").await;
        let refreshed = send(&router, Method::GET, "/scan?exchange=bybit&refresh=on").await;
        assert_eq!(refreshed.headers()[&SCAN_STATUS], "refreshed");
        let posted = send(&router, Method::POST, "/scan?exchange=bybit").await;
        assert_eq!(posted.status(), StatusCode::OK);

        assert_eq!(source.list_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unreachable_exchange_without_cache_is_503() {
        let mut source = bybit();
        source.unreachable = true;
        let (router, _) = app(source);

        let response = send(&router, Method::GET, "/scan?exchange=okx").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let page = send(&router, Method::GET, "/results?exchange=okx").await;
        assert_eq!(page.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_text(page).await.contains("okx is unavailable"));
    }

    #[tokio::test]
    async fn dashboard_renders_default_exchange() {
        let (router, _) = app(bybit());
        let response = send(&router, Method::GET, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains(r#"<option value="bybit" selected>BYBIT</option>"#));
        assert!(html.contains("<td>AAA/USDT</td>"));
        assert!(html.contains(r#"content="900;url=/results?exchange=bybit""#));
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (router, _) = app(bybit());
        let response = send(&router, Method::GET, "/health").await;
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[test]
    fn stale_lookup_sets_notice_header() {
        use crate::analysis::{RankBy, ScanResult};
        use crate::cache::CacheEntry;

        let at = Utc::now();
        let lookup = CacheLookup {
            entry: Arc::new(CacheEntry {
                result: Arc::new(ScanResult {
                    exchange: ExchangeId::Gate,
                    started_at: at,
                    finished_at: at,
                    rank_by: RankBy::VolumeRatio,
                    pairs_scanned: 0,
                    pairs_failed: 0,
                    rows: Vec::new(),
                }),
                refreshed_at: at,
            }),
            freshness: Freshness::Stale {
                reason: "gate is unavailable: timeout".into(),
            },
        };
        let headers = scan_headers(&lookup);
        assert_eq!(headers[&SCAN_STATUS], "stale");
        assert!(headers[&SCAN_NOTICE].to_str().unwrap().starts_with(STALE_NOTICE));
    }
}
