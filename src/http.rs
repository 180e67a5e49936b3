//! HTTP ingress. `AppState`/`Metrics` generalize the teacher's own
//! `AppState`/`Metrics` pair, trading its ingest-specific counters for
//! ones that matter to this pipeline's queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::gtfs;
use crate::model::{Location, ReportMessage};
use crate::queue::QueueSender;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn QueueSender>,
    pub store: Store,
    pub metrics: Arc<Metrics>,
}

#[derive(Default)]
pub struct Metrics {
    enqueued: AtomicU64,
    rejected_malformed: AtomicU64,
    queue_closed: AtomicU64,
}

impl Metrics {
    fn new() -> Self {
        Self::default()
    }
}

#[derive(Serialize)]
struct MetricsResponse {
    enqueued: u64,
    rejected_malformed: u64,
    queue_closed: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/enqueue", post(enqueue))
        .route("/api/incidents", get(list_incidents))
        .route("/api/incidents/:id/reports", get(incident_reports))
        .route("/api/reports", get(list_reports))
        .route("/api/types", get(list_types))
        .route("/api/locations", get(list_locations))
        .route("/gtfs/trip-updates", get(trip_updates))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[instrument(skip_all)]
async fn enqueue(State(s): State<AppState>, body: axum::body::Bytes) -> impl IntoResponse {
    let msg: ReportMessage = match serde_json::from_slice(&body) {
        Ok(m) => m,
        Err(e) => {
            s.metrics.rejected_malformed.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "rejected malformed report body");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid payload"})),
            )
                .into_response();
        }
    };

    match s.queue.send(msg).await {
        Ok(()) => {
            s.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "Report enqueued",
                    "queue_size": s.queue.queue_size(),
                })),
            )
                .into_response()
        }
        Err(_) => {
            s.metrics.queue_closed.fetch_add(1, Ordering::Relaxed);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Could not enqueue report"})),
            )
                .into_response()
        }
    }
}

#[derive(Serialize)]
struct IncidentResponse {
    id: i64,
    location_id: i64,
    location_name: String,
    type_id: i64,
    avg_delay: Option<f64>,
    trust_score: f64,
    status: String,
    created_at: chrono::NaiveDateTime,
    last_updated: chrono::NaiveDateTime,
}

async fn list_incidents(State(s): State<AppState>) -> Result<Json<Vec<IncidentResponse>>, ApiError> {
    let incidents = s.store.list_incidents_with_location_name().await?;
    Ok(Json(
        incidents
            .into_iter()
            .map(|(i, name)| IncidentResponse {
                id: i.id,
                location_id: i.location_id,
                location_name: name,
                type_id: i.type_id,
                avg_delay: i.avg_delay,
                trust_score: i.trust_score,
                status: i.status,
                created_at: i.created_at,
                last_updated: i.last_updated,
            })
            .collect(),
    ))
}

async fn list_reports(State(s): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(s.store.list_reports().await?))
}

/// Empty result sets are a normal, successful answer, not a 404 — the
/// incident id itself is not validated against existence.
async fn incident_reports(State(s): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(s.store.reports_by_incident(id).await?))
}

async fn list_types(State(s): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let types = s.store.list_report_types().await?;
    Ok(Json(
        types
            .into_iter()
            .map(|(id, name)| serde_json::json!({"id": id, "name": name}))
            .collect::<Vec<_>>(),
    ))
}

async fn list_locations(State(s): State<AppState>) -> Result<Json<Vec<Location>>, ApiError> {
    Ok(Json(s.store.list_locations().await?))
}

async fn trip_updates(State(s): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let now = chrono::Utc::now().naive_utc();
    let feed = gtfs::build_feed(&s.store, now).await?;
    Ok((
        [("content-type", "application/x-protobuf")],
        gtfs::encode_feed(&feed),
    ))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(s): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        enqueued: s.metrics.enqueued.load(Ordering::Relaxed),
        rejected_malformed: s.metrics.rejected_malformed.load(Ordering::Relaxed),
        queue_closed: s.metrics.queue_closed.load(Ordering::Relaxed),
    })
}

impl AppState {
    pub fn new(queue: Arc<dyn QueueSender>, store: Store) -> Self {
        Self {
            queue,
            store,
            metrics: Arc::new(Metrics::new()),
        }
    }
}

struct ApiError(crate::error::PipelineError);

impl From<crate::error::PipelineError> for ApiError {
    fn from(e: crate::error::PipelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = %self.0, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}
