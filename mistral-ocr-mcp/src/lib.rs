pub mod api;
pub mod config;
pub mod error;
pub mod images;
pub mod mcp;
pub mod ocr;
pub mod sandbox;
pub mod services;
