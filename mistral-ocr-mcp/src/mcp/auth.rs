use axum::{
    body::Body,
    extract::State,
    http::{
        header::{AUTHORIZATION, WWW_AUTHENTICATE},
        HeaderValue, Request, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::api::AppState;

/// Caller identity attached to authenticated HTTP requests.
#[derive(Debug, Clone)]
pub struct McpAuthContext {
    pub client_id: String,
}

pub async fn mcp_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let tokens = &state.config.server.auth_tokens;

    if tokens.is_empty() {
        request.extensions_mut().insert(McpAuthContext {
            client_id: "anonymous".to_string(),
        });
        return next.run(request).await;
    }

    let Some(auth_header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        return unauthorized_json_rpc("Unauthorized");
    };

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        return unauthorized_json_rpc(
            "Unauthorized: Invalid authorization header format. Expected: Bearer <token>",
        );
    };

    if !tokens.iter().any(|known| known == token) {
        return unauthorized_json_rpc("Unauthorized: Invalid token");
    }

    let client_id = client_id_from_token(token);
    request
        .extensions_mut()
        .insert(McpAuthContext { client_id });

    next.run(request).await
}

pub fn auth_context_from_parts(parts: &axum::http::request::Parts) -> Option<McpAuthContext> {
    parts.extensions.get::<McpAuthContext>().cloned()
}

/// Short, stable fingerprint of a token, safe to log.
fn client_id_from_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    let hash = format!("{digest:x}");
    format!("token_{}", &hash[..16])
}

fn unauthorized_json_rpc(message: &str) -> Response {
    let payload = json!({
        "jsonrpc": "2.0",
        "error": {
            "code": -32000,
            "message": message,
        },
        "id": serde_json::Value::Null,
    });

    let mut response = (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response();

    response.headers_mut().insert(
        WWW_AUTHENTICATE,
        HeaderValue::from_static("Bearer error=\"invalid_token\""),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_is_stable_and_hides_token() {
        let client_id = client_id_from_token("super-secret");
        assert!(client_id.starts_with("token_"));
        assert!(!client_id.contains("super-secret"));
        assert_eq!(client_id.len(), "token_".len() + 16);
        assert_eq!(client_id, client_id_from_token("super-secret"));
    }

    #[test]
    fn unauthorized_response_carries_challenge() {
        let response = unauthorized_json_rpc("Unauthorized");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(WWW_AUTHENTICATE));
    }
}
