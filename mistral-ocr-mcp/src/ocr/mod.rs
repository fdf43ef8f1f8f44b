//! OCR (Optical Character Recognition) Module
//!
//! Converts PDFs and images into markdown through the hosted Mistral OCR API.
//!
//! # Architecture
//!
//! - `OcrBackend` trait defines the submit-document capability
//! - `MistralOcrClient` implements it over HTTP (upload, signed URL, `/ocr`)
//! - `OcrProvider` wraps a backend with the configured timeout, caller
//!   cancellation and the bounded retry policy
//!
//! Tests substitute their own `OcrBackend` to run without network access.
//!
//! # Usage
//!
//! ```rust,ignore
//! let ocr = OcrProvider::new(&config.mistral)?;
//! let request = OcrRequest::new(DocumentSource::Path(path), OutputMode::MarkdownOnly);
//! let result = ocr.process(&request, &cancel_token).await?;
//! ```

mod api;
mod models;
mod provider;

pub use api::MistralOcrClient;
pub use models::{DocumentSource, ExtractedImage, OcrPage, OcrRequest, OcrResult, OutputMode};
pub use provider::{OcrBackend, OcrProvider};
