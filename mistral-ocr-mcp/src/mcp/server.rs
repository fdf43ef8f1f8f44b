use axum::http::request::Parts;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    service::RequestContext,
    tool, tool_handler, tool_router,
    transport::{
        streamable_http_server::{
            session::local::LocalSessionManager, tower::StreamableHttpService,
        },
        StreamableHttpServerConfig,
    },
    ErrorData as McpError, RoleServer, ServerHandler,
};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::{
    api::AppState,
    error::MistralOcrError,
    mcp::auth::auth_context_from_parts,
    sandbox::SUPPORTED_EXTENSIONS,
};

#[derive(Clone)]
pub struct OcrMcpServer {
    state: AppState,
    tool_router: ToolRouter<Self>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractMarkdownArgs {
    /// Absolute path to a PDF or image (.pdf, .png, .jpg, .jpeg, .webp, .gif).
    #[serde(alias = "document")]
    file_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractMarkdownWithImagesArgs {
    /// Absolute path to a PDF or image (.pdf, .png, .jpg, .jpeg, .webp, .gif).
    #[serde(alias = "document")]
    file_path: String,
    /// Absolute directory for extracted images. Must be inside the server's
    /// allowed directory; missing subdirectories are created.
    #[serde(alias = "output_directory")]
    output_dir: String,
}

impl OcrMcpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    fn request_parts<'a>(&self, ctx: &'a RequestContext<RoleServer>) -> Option<&'a Parts> {
        ctx.extensions.get::<Parts>()
    }

    fn client_id(&self, ctx: &RequestContext<RoleServer>) -> String {
        self.request_parts(ctx)
            .and_then(auth_context_from_parts)
            .map(|auth| auth.client_id)
            .unwrap_or_else(|| "stdio".to_string())
    }

    fn tool_error(tool: &'static str, client: &str, error: MistralOcrError) -> McpError {
        match &error {
            MistralOcrError::Cancelled => {
                tracing::info!(tool, client, "Tool call cancelled");
            }
            error => {
                tracing::warn!(tool, client, kind = error.kind(), error = %error, "Tool call failed");
            }
        }
        error.into()
    }
}

fn require_non_empty<'a>(name: &str, value: &'a str) -> Result<&'a str, McpError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(McpError::invalid_params(
            format!("{name} cannot be empty"),
            None,
        ));
    }
    Ok(trimmed)
}

#[tool_router]
impl OcrMcpServer {
    #[tool(
        name = "extract_markdown",
        description = "Convert a local PDF or image into markdown using Mistral OCR. Returns the markdown of all pages."
    )]
    async fn extract_markdown_tool(
        &self,
        Parameters(args): Parameters<ExtractMarkdownArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let file_path = require_non_empty("file_path", &args.file_path)?;
        let client = self.client_id(&ctx);
        tracing::debug!(client = %client, file_path, "extract_markdown called");

        let markdown = self
            .state
            .extraction
            .extract_markdown(file_path, &ctx.ct)
            .await
            .map_err(|error| Self::tool_error("extract_markdown", &client, error))?;

        Ok(CallToolResult::success(vec![Content::text(markdown)]))
    }

    #[tool(
        name = "extract_markdown_with_images",
        description = "Convert a local PDF or image into markdown using Mistral OCR and save embedded images to output_dir. Image links in the returned markdown point at the saved files."
    )]
    async fn extract_markdown_with_images_tool(
        &self,
        Parameters(args): Parameters<ExtractMarkdownWithImagesArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let file_path = require_non_empty("file_path", &args.file_path)?;
        let output_dir = require_non_empty("output_dir", &args.output_dir)?;
        let client = self.client_id(&ctx);
        tracing::debug!(client = %client, file_path, output_dir, "extract_markdown_with_images called");

        let extracted = self
            .state
            .extraction
            .extract_markdown_with_images(file_path, output_dir, &ctx.ct)
            .await
            .map_err(|error| Self::tool_error("extract_markdown_with_images", &client, error))?;

        let mut summary = vec![format!(
            "Saved {} image(s) to {}",
            extracted.images.len(),
            extracted.output_dir.display()
        )];
        summary.extend(
            extracted
                .images
                .iter()
                .map(|image| format!("- {}", image.path.display())),
        );

        Ok(CallToolResult::success(vec![
            Content::text(extracted.markdown),
            Content::text(summary.join("\n")),
        ]))
    }
}

#[tool_handler]
impl ServerHandler for OcrMcpServer {
    fn get_info(&self) -> ServerInfo {
        let images = if self.state.extraction.images_enabled() {
            "extract_markdown_with_images saves embedded images inside the allowed directory."
        } else {
            "extract_markdown_with_images is disabled because MISTRAL_OCR_ALLOWED_DIR is not set."
        };

        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mistral-ocr-mcp".to_string(),
                title: Some("Mistral OCR MCP".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Use extract_markdown to turn a local document ({}) into markdown. {images}",
                SUPPORTED_EXTENSIONS
                    .iter()
                    .map(|ext| format!(".{ext}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

pub fn streamable_http_service(
    state: AppState,
) -> StreamableHttpService<OcrMcpServer, LocalSessionManager> {
    StreamableHttpService::new(
        move || Ok(OcrMcpServer::new(state.clone())),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MistralConfig, SandboxConfig, ServerConfig};
    use crate::ocr::{OcrBackend, OcrProvider, OcrRequest, OcrResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoopBackend;

    #[async_trait]
    impl OcrBackend for NoopBackend {
        async fn process(&self, _request: &OcrRequest) -> crate::error::Result<OcrResult> {
            Ok(OcrResult::default())
        }
    }

    fn server(allowed_dir: Option<std::path::PathBuf>) -> OcrMcpServer {
        let config = Config {
            server: ServerConfig::default(),
            mistral: MistralConfig::new("test-key"),
            sandbox: SandboxConfig { allowed_dir },
        };
        let ocr = OcrProvider::with_backend(Arc::new(NoopBackend), Duration::from_secs(5), 0);
        OcrMcpServer::new(AppState::new(config, ocr).unwrap())
    }

    #[test]
    fn test_both_tools_are_registered() {
        let server = server(None);
        let mut names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();

        assert_eq!(names, vec!["extract_markdown", "extract_markdown_with_images"]);
    }

    #[test]
    fn test_info_reports_disabled_image_extraction() {
        let info = server(None).get_info();
        let instructions = info.instructions.unwrap();
        assert!(instructions.contains("disabled"));
        assert!(info.capabilities.tools.is_some());
    }

    #[test]
    fn test_info_reports_enabled_image_extraction() {
        let dir = tempfile::TempDir::new().unwrap();
        let info = server(Some(dir.path().to_path_buf())).get_info();
        assert!(!info.instructions.unwrap().contains("disabled"));
    }

    #[test]
    fn test_args_accept_aliases() {
        let args: ExtractMarkdownWithImagesArgs = serde_json::from_value(json!({
            "document": "/docs/invoice.pdf",
            "output_directory": "/tmp/out/sub",
        }))
        .unwrap();

        assert_eq!(args.file_path, "/docs/invoice.pdf");
        assert_eq!(args.output_dir, "/tmp/out/sub");
    }

    #[test]
    fn test_empty_arguments_are_rejected() {
        let error = require_non_empty("file_path", "   ").unwrap_err();
        assert_eq!(error.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(require_non_empty("file_path", " /a.pdf ").unwrap(), "/a.pdf");
    }
}
