use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::error::NotifierError;
use crate::types::{Config, HealthStatus};

pub struct AppState {
    pub config: Arc<Config>,
}

/// Handler failures rendered as `{"status": "error", "error": ...}`.
pub struct ApiError(NotifierError);

impl From<NotifierError> for ApiError {
    fn from(err: NotifierError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "error": self.0.to_string()})),
        )
            .into_response()
    }
}

/// Liveness only; it says nothing about how recent cycles went.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<HealthStatus>, ApiError> {
    Ok(Json(HealthStatus {
        status: "alive",
        auto_send_enabled: state.config.auto_send_enabled,
    }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check).post(health_check))
        .route("/health", get(health_check).post(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the health endpoint until `shutdown` resolves.
pub async fn run_server<F>(config: Arc<Config>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = build_router(Arc::new(AppState { config }));

    tracing::info!("Starting health endpoint on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Health endpoint stopped");
    Ok(())
}
