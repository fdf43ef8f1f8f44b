#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mistral_ocr_mcp::config::MistralConfig;
use mistral_ocr_mcp::error::{MistralOcrError, Result};
use mistral_ocr_mcp::images::decode_image;
use mistral_ocr_mcp::ocr::{OcrBackend, OcrPage, OcrProvider, OcrRequest, OcrResult};

/// 1x1 transparent PNG.
pub const PNG_PIXEL: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8/5+hHgAHggJ/PchI7wAAAABJRU5ErkJggg==";

pub fn png_data_uri() -> String {
    format!("data:image/png;base64,{PNG_PIXEL}")
}

pub fn mistral_config(base_url: &str) -> MistralConfig {
    let mut config = MistralConfig::new("test-key");
    config.base_url = base_url.to_string();
    config.timeout_secs = 5;
    config
}

/// Writes a small PDF-looking file named `name` into `dir`.
pub fn write_document(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"%PDF-1.4\n%fake invoice\n").expect("Failed to write document fixture");
    path
}

/// Every regular file below `root`, sorted.
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

pub const INVOICE_PAGE_0: &str = "# Invoice 42\n\n![logo](img-0.jpeg)\n\nTotal: 10 EUR";
pub const INVOICE_PAGE_1: &str = "## Terms\n\n![signature](img-1.png)";

/// Backend returning a fixed two-page invoice with one image per page.
pub struct InvoiceBackend {
    calls: AtomicUsize,
}

impl InvoiceBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrBackend for InvoiceBackend {
    async fn process(&self, request: &OcrRequest) -> Result<OcrResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let pages = vec![
            OcrPage {
                index: 1,
                markdown: INVOICE_PAGE_1.to_string(),
            },
            OcrPage {
                index: 0,
                markdown: INVOICE_PAGE_0.to_string(),
            },
        ];
        let images = if request.mode.includes_images() {
            vec![
                decode_image(
                    "img-0.jpeg",
                    0,
                    &format!("data:image/jpeg;base64,{PNG_PIXEL}"),
                )?,
                decode_image("img-1.png", 1, &png_data_uri())?,
            ]
        } else {
            Vec::new()
        };

        Ok(OcrResult::from_pages(
            pages,
            images,
            "mistral-ocr-latest".to_string(),
            Some(2),
        ))
    }
}

/// Backend that always fails with the error built by `make_error`.
pub struct FailingBackend {
    pub make_error: fn() -> MistralOcrError,
}

#[async_trait]
impl OcrBackend for FailingBackend {
    async fn process(&self, _request: &OcrRequest) -> Result<OcrResult> {
        Err((self.make_error)())
    }
}

/// Backend that never answers.
pub struct StalledBackend;

#[async_trait]
impl OcrBackend for StalledBackend {
    async fn process(&self, _request: &OcrRequest) -> Result<OcrResult> {
        std::future::pending::<Result<OcrResult>>().await
    }
}

pub fn provider(backend: Arc<dyn OcrBackend>) -> OcrProvider {
    OcrProvider::with_backend(backend, Duration::from_secs(5), 0)
}
