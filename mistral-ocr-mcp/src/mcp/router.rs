use axum::{middleware, Router};

use crate::api::AppState;

use super::{auth::mcp_auth_middleware, server::streamable_http_service};

/// Mounts the streamable HTTP MCP endpoint behind the bearer-token check.
pub fn mcp_router(state: AppState) -> Router<AppState> {
    let mcp_path = state.config.server.mcp_path.clone();
    let mcp_service = streamable_http_service(state.clone());

    Router::new()
        .nest_service(&mcp_path, mcp_service)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            mcp_auth_middleware,
        ))
}
