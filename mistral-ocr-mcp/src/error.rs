use std::time::Duration;

use rmcp::ErrorData as McpError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MistralOcrError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported document: {0}")]
    UnsupportedDocument(String),

    #[error("Mistral API authentication failed: {0}")]
    UpstreamAuth(String),

    #[error("Mistral API rate limit exceeded, retry after {retry_after:?}")]
    UpstreamRateLimited { retry_after: Option<Duration> },

    #[error("Mistral API server error ({status}): {message}")]
    UpstreamServer { status: u16, message: String },

    #[error("Mistral API request failed ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Mistral API request timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected Mistral API response: {0}")]
    UpstreamProtocol(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request cancelled")]
    Cancelled,
}

impl MistralOcrError {
    /// Stable machine-readable code reported to MCP callers.
    pub fn kind(&self) -> &'static str {
        match self {
            MistralOcrError::Configuration(_) => "configuration_error",
            MistralOcrError::PermissionDenied(_) => "permission_denied",
            MistralOcrError::InvalidPath(_) => "invalid_path",
            MistralOcrError::UnsupportedDocument(_) => "unsupported_document",
            MistralOcrError::UpstreamAuth(_) => "upstream_auth_error",
            MistralOcrError::UpstreamRateLimited { .. } => "upstream_rate_limited",
            MistralOcrError::UpstreamServer { .. } => "upstream_server_error",
            MistralOcrError::Upstream { .. } => "upstream_error",
            MistralOcrError::UpstreamTimeout(_) => "upstream_timeout",
            MistralOcrError::Network(_) => "network_error",
            MistralOcrError::UpstreamProtocol(_) => "upstream_protocol_error",
            MistralOcrError::Image(_) => "image_error",
            MistralOcrError::Io(_) => "io_error",
            MistralOcrError::Cancelled => "cancelled",
        }
    }

    /// Whether a bounded retry may re-submit the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MistralOcrError::UpstreamRateLimited { .. }
                | MistralOcrError::UpstreamServer { .. }
                | MistralOcrError::UpstreamTimeout(_)
                | MistralOcrError::Network(_)
        )
    }

    fn is_caller_error(&self) -> bool {
        matches!(
            self,
            MistralOcrError::PermissionDenied(_)
                | MistralOcrError::InvalidPath(_)
                | MistralOcrError::UnsupportedDocument(_)
        )
    }
}

impl From<MistralOcrError> for McpError {
    fn from(error: MistralOcrError) -> Self {
        let data = Some(json!({ "kind": error.kind() }));
        let message = error.to_string();

        if error.is_caller_error() {
            McpError::invalid_params(message, data)
        } else {
            McpError::internal_error(message, data)
        }
    }
}

pub type Result<T> = std::result::Result<T, MistralOcrError>;
