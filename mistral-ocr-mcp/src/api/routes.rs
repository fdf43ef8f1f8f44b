use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use super::AppState;
use crate::mcp::mcp_router;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(mcp_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.config.mistral.model,
        "imagesEnabled": state.extraction.images_enabled(),
    }))
}
