use axum::{
    routing::{get, post},
    Router,
};
use hourglass_core::HourglassConfig;
use hourglass_scheduler::{StatusService, TaskStore};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: HourglassConfig,
    /// The HTTP surface's own store handle; workers open their own.
    pub store: Arc<TaskStore>,
    pub status: StatusService,
}

impl AppState {
    pub fn new(config: HourglassConfig, store: Arc<TaskStore>) -> Self {
        let status = StatusService::new(Arc::clone(&store));
        Self {
            config,
            store,
            status,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/tasks", post(crate::http::tasks::create_task))
        .route("/tasks/{id}/status", get(crate::http::tasks::task_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
