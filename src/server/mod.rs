//! Operational HTTP surface
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /health` | liveness, always 200 while the process runs |
//! | `GET /status` | mode, day, last region, uptime, lock, credentials, row counts |
//! | `POST /lock/reset` | clear a stuck single-flight lock |
//! | `GET /metrics` | Prometheus text exposition |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::scheduler::{CycleScheduler, StatusReport};

// ============================================================================
// App State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<CycleScheduler>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(scheduler: Arc<CycleScheduler>) -> Self {
        Self {
            scheduler,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct LockResetResponse {
    pub released: bool,
}

// ============================================================================
// Router
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/lock/reset", post(reset_lock))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn status(State(state): State<AppState>) -> Response {
    match state.scheduler.status().await {
        Ok(report) => (StatusCode::OK, Json(ApiResponse::success(report))).into_response(),
        Err(e) => {
            error!(error = %e, "Status query failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::<StatusReport>::error(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn reset_lock(State(state): State<AppState>) -> Response {
    match state.scheduler.reset_lock().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(LockResetResponse { released: true })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Lock reset failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<LockResetResponse>::error(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn metrics() -> Response {
    match crate::metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid listen address '{0}'")]
    Address(String),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

pub struct HarvestServer {
    addr: SocketAddr,
    state: AppState,
}

impl HarvestServer {
    pub fn new(listen: &str, scheduler: Arc<CycleScheduler>) -> Result<Self, ServerError> {
        let addr = listen
            .parse::<SocketAddr>()
            .map_err(|_| ServerError::Address(listen.to_string()))?;
        Ok(Self {
            addr,
            state: AppState::new(scheduler),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn build_router(&self) -> Router {
        create_router(self.state.clone())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` resolves
    pub async fn serve_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr.to_string(),
                source,
            })?;

        info!(addr = %self.addr, "Operational server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;

        info!("Operational server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiPage, ApiRequest, ApiResult, PagingClient, PagingSettings, VideoApi};
    use crate::credentials::{CredentialPool, PoolSettings, QuotaCostTable};
    use crate::pipeline::{Pipeline, PipelineSettings};
    use crate::scheduler::SchedulerSettings;
    use crate::storage::{SharedStore, SqliteStore, StateStore};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    struct EmptyApi;

    #[async_trait]
    impl VideoApi for EmptyApi {
        async fn fetch(&self, _key: &str, _request: &ApiRequest) -> ApiResult<ApiPage> {
            Ok(ApiPage::default())
        }
    }

    fn state() -> (AppState, SharedStore) {
        let store: SharedStore = Arc::new(SqliteStore::in_memory().unwrap());
        let pool = Arc::new(
            CredentialPool::new(
                vec!["key-a".to_string()],
                QuotaCostTable::default(),
                PoolSettings::default(),
            )
            .unwrap(),
        );
        let client = Arc::new(PagingClient::new(
            Arc::new(EmptyApi),
            pool,
            PagingSettings::default(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            client,
            store.clone(),
            PipelineSettings::default(),
        ));
        let scheduler = Arc::new(CycleScheduler::new(pipeline, SchedulerSettings::default()));
        (AppState::new(scheduler), store)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = state();
        let response = create_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_reports_initial_state() {
        let (state, _) = state();
        let response = create_router(state)
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["mode"], "FETCH");
        assert_eq!(json["data"]["day"], 1);
        assert_eq!(json["data"]["locked"], false);
        // Keys are masked in the credential snapshot.
        assert_ne!(json["data"]["credentials"][0]["key"], "key-a");
    }

    #[tokio::test]
    async fn test_lock_reset_clears_lock() {
        let (state, store) = state();
        let now = Utc::now();
        store
            .ensure_cycle_state(&crate::scheduler::CycleState::initial(now))
            .await
            .unwrap();
        assert!(store.try_acquire_lock(now, now).await.unwrap());

        let response = create_router(state)
            .oneshot(Request::post("/lock/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stored = store.load_cycle_state().await.unwrap().unwrap();
        assert!(!stored.locked);
    }

    #[test]
    fn test_invalid_listen_address() {
        let (state, _) = state();
        let err = HarvestServer::new("not-an-address", state.scheduler).err().unwrap();
        assert!(matches!(err, ServerError::Address(_)));
    }
}
