mod auth;
mod router;
mod server;

pub use router::mcp_router;
pub use server::{streamable_http_service, OcrMcpServer};
