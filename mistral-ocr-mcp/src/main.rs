use clap::Parser;
use rmcp::ServiceExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mistral_ocr_mcp::api::{create_router, AppState};
use mistral_ocr_mcp::config::{Config, Transport};
use mistral_ocr_mcp::mcp::OcrMcpServer;

#[derive(Parser)]
#[command(name = "mistral-ocr-mcp")]
#[command(about = "MCP server that converts PDFs and images to markdown with Mistral OCR")]
#[command(version)]
struct Args {
    /// Transport to serve MCP over (overrides MISTRAL_OCR_TRANSPORT)
    #[arg(long, value_enum)]
    transport: Option<Transport>,

    /// Bind address for the HTTP transport
    #[arg(long)]
    host: Option<String>,

    /// Port for the HTTP transport
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    // stdout carries the stdio protocol, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mistral_ocr_mcp=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env()?;
    if let Some(transport) = args.transport {
        config.server.transport = transport;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!(
        model = %config.mistral.model,
        base_url = %config.mistral.base_url,
        timeout_secs = config.mistral.timeout_secs,
        max_retries = config.mistral.max_retries,
        "Initializing Mistral OCR client"
    );
    let state = AppState::from_config(config.clone())?;

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    match config.server.transport {
        Transport::Stdio => serve_stdio(state, cancel_token).await,
        Transport::Http => serve_http(state, &config, cancel_token).await,
    }
}

async fn serve_stdio(state: AppState, cancel_token: CancellationToken) -> anyhow::Result<()> {
    tracing::info!("Mistral OCR MCP server listening on stdio");

    let service = OcrMcpServer::new(state)
        .serve(rmcp::transport::stdio())
        .await?;

    tokio::select! {
        quit = service.waiting() => {
            let reason = quit?;
            tracing::info!(?reason, "stdio session ended");
        }
        _ = cancel_token.cancelled() => {}
    }

    Ok(())
}

async fn serve_http(
    state: AppState,
    config: &Config,
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    if config.server.auth_tokens.is_empty() {
        tracing::warn!("MISTRAL_OCR_AUTH_TOKENS is not set - the MCP endpoint accepts anonymous callers");
    }

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Mistral OCR MCP starting on http://{}", addr);
    tracing::info!("  Health check: http://{}/health", addr);
    tracing::info!("  MCP endpoint: http://{}{}", addr, config.server.mcp_path);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await?;

    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    cancel_token.cancel();
}
