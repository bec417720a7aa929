use crate::metrics::Metrics;
use crate::scheduler::SnapshotHandle;
use crate::state::Snapshot;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub handle: SnapshotHandle,
}

/// The snapshot plus display-ready renderings of its time fields.
#[derive(Debug, serde::Serialize)]
pub struct ApiSnapshot<'a> {
    pub collected_at: Option<String>,
    pub uptime: Option<String>,
    #[serde(flatten)]
    pub snapshot: &'a Snapshot,
}

impl<'a> From<&'a Snapshot> for ApiSnapshot<'a> {
    fn from(snapshot: &'a Snapshot) -> Self {
        let collected_at = (!snapshot.is_placeholder()).then(|| {
            let at = UNIX_EPOCH + Duration::from_secs(snapshot.collected_at_unix.max(0) as u64);
            humantime::format_rfc3339_seconds(at).to_string()
        });
        let uptime = snapshot.identity.as_ref().map(|identity| {
            humantime::format_duration(Duration::from_secs(identity.uptime.as_secs())).to_string()
        });
        Self {
            collected_at,
            uptime,
            snapshot,
        }
    }
}

pub fn build_router(metrics: Arc<Metrics>, handle: SnapshotHandle) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/refresh", post(refresh_handler))
        .with_state(HttpAppState { metrics, handle })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    state.metrics.refresh_uptime();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn snapshot_handler(State(state): State<HttpAppState>) -> Response {
    let snapshot = state.handle.latest();
    Json(ApiSnapshot::from(snapshot.as_ref())).into_response()
}

async fn refresh_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    state.handle.request_refresh();
    (StatusCode::ACCEPTED, "refresh scheduled")
}
