use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What the caller wants back from an OCR call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    MarkdownOnly,
    MarkdownWithImages,
}

impl OutputMode {
    pub fn includes_images(self) -> bool {
        matches!(self, OutputMode::MarkdownWithImages)
    }
}

#[derive(Debug, Clone)]
pub enum DocumentSource {
    /// Canonical path to a validated local file.
    Path(PathBuf),
    Bytes { file_name: String, data: Vec<u8> },
}

impl DocumentSource {
    pub fn file_name(&self) -> String {
        match self {
            DocumentSource::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string()),
            DocumentSource::Bytes { file_name, .. } => file_name.clone(),
        }
    }

    /// File name without its extension, used to prefix saved images.
    pub fn stem(&self) -> String {
        let name = self.file_name();
        Path::new(&name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or(name)
    }

    pub fn is_pdf(&self) -> bool {
        Path::new(&self.file_name())
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    }
}

#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub document: DocumentSource,
    pub mode: OutputMode,
}

impl OcrRequest {
    pub fn new(document: DocumentSource, mode: OutputMode) -> Self {
        Self { document, mode }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrPage {
    pub index: u32,
    pub markdown: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedImage {
    /// Identifier assigned by the OCR service, as referenced in the markdown.
    pub id: String,
    pub page: u32,
    pub mime_type: String,
    pub extension: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct OcrResult {
    pub markdown: String,
    pub pages: Vec<OcrPage>,
    pub images: Vec<ExtractedImage>,
    pub model: String,
    pub pages_processed: Option<u32>,
}

impl OcrResult {
    /// Joins page markdown in page order, separated by a blank line.
    pub fn from_pages(
        mut pages: Vec<OcrPage>,
        images: Vec<ExtractedImage>,
        model: String,
        pages_processed: Option<u32>,
    ) -> Self {
        pages.sort_by_key(|page| page.index);

        let markdown = pages
            .iter()
            .map(|page| page.markdown.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Self {
            markdown,
            pages,
            images,
            model,
            pages_processed,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types for the Mistral files and OCR endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct UploadedFile {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignedUrl {
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub(crate) enum DocumentChunk {
    #[serde(rename = "document_url")]
    DocumentUrl { document_url: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: String },
}

#[derive(Debug, Serialize)]
pub(crate) struct OcrApiRequest {
    pub model: String,
    pub document: DocumentChunk,
    pub include_image_base64: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OcrApiResponse {
    #[serde(default)]
    pub pages: Vec<OcrApiPage>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage_info: Option<OcrUsageInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OcrApiPage {
    pub index: u32,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub images: Vec<OcrApiImage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OcrApiImage {
    pub id: String,
    #[serde(default)]
    pub image_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OcrUsageInfo {
    pub pages_processed: u32,
}

/// Error body shapes returned by the API: `{"message": ..}` or `{"detail": ..}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}
