use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::RunnerError;
use crate::queue::{Job, JobKind, JobQueue, Launch, Mount, QueueStatus};

#[derive(Clone)]
pub struct DashboardState {
    pub launch: JobQueue<Launch>,
    pub mount: JobQueue<Mount>,
}

#[derive(Debug, Serialize)]
struct JobResponse {
    ordinal: i64,
    udid: String,
    ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bundle_id: Option<String>,
    status: String,
    error: Option<String>,
}

impl JobResponse {
    fn from_job<K: JobKind>(job: Job<K>, bundle_id: Option<String>) -> Self {
        Self {
            ordinal: job.ordinal,
            udid: job.udid,
            ip: job.ip,
            bundle_id,
            status: job.status.to_string(),
            error: job.error,
        }
    }
}

#[derive(Debug, Serialize)]
struct QueueCounts {
    pending: usize,
    claimed: usize,
    failed: usize,
}

impl From<(usize, usize, usize)> for QueueCounts {
    fn from((pending, claimed, failed): (usize, usize, usize)) -> Self {
        Self {
            pending,
            claimed,
            failed,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    launch: QueueCounts,
    mount: QueueCounts,
}

#[derive(Debug, Serialize)]
struct QueuesResponse {
    launch: Vec<JobResponse>,
    mount: Vec<JobResponse>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    udid: String,
    launch: QueueStatus,
    mount: QueueStatus,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

struct ApiError(RunnerError);

impl From<RunnerError> for ApiError {
    fn from(e: RunnerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "Status request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Read-only routes over both queues.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/queues", get(queues_handler))
        .route("/api/status/:udid", get(status_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting status server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind status server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Status server failed");
    }
}

async fn health_handler(State(state): State<DashboardState>) -> Result<Json<HealthResponse>, ApiError> {
    let launch = state.launch.blocking(|q| q.counts()).await?.into();
    let mount = state.mount.blocking(|q| q.counts()).await?.into();
    Ok(Json(HealthResponse {
        status: "ok",
        launch,
        mount,
    }))
}

async fn queues_handler(State(state): State<DashboardState>) -> Result<Json<QueuesResponse>, ApiError> {
    let launch = state
        .launch
        .blocking(|q| q.list())
        .await?
        .into_iter()
        .map(|job| {
            let bundle_id = job.bundle_id().to_string();
            JobResponse::from_job(job, Some(bundle_id))
        })
        .collect();
    let mount = state
        .mount
        .blocking(|q| q.list())
        .await?
        .into_iter()
        .map(|job| JobResponse::from_job(job, None))
        .collect();

    Ok(Json(QueuesResponse { launch, mount }))
}

/// Uses the non-consuming lookup; failed rows stay in place for the producer.
async fn status_handler(
    State(state): State<DashboardState>,
    Path(udid): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let key = udid.clone();
    let launch = state.launch.blocking(move |q| q.status(&key)).await?;
    let key = udid.clone();
    let mount = state.mount.blocking(move |q| q.status(&key)).await?;

    Ok(Json(StatusResponse {
        udid,
        launch,
        mount,
    }))
}
