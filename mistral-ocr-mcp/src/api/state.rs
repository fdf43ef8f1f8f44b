use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::ocr::OcrProvider;
use crate::sandbox::PathSandbox;
use crate::services::ExtractionService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub extraction: ExtractionService,
}

impl AppState {
    /// Wires the services together. A configured but unusable
    /// `MISTRAL_OCR_ALLOWED_DIR` is rejected here rather than on first use.
    pub fn new(config: Config, ocr: OcrProvider) -> Result<Self> {
        let sandbox = config
            .sandbox
            .allowed_dir
            .as_deref()
            .map(PathSandbox::new)
            .transpose()?;

        match &sandbox {
            Some(sandbox) => tracing::info!(
                allowed_dir = %sandbox.root().display(),
                "Image extraction enabled"
            ),
            None => tracing::warn!(
                "MISTRAL_OCR_ALLOWED_DIR is not set - extract_markdown_with_images is disabled"
            ),
        }

        Ok(Self {
            config: Arc::new(config),
            extraction: ExtractionService::new(ocr, sandbox),
        })
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let ocr = OcrProvider::new(&config.mistral)?;
        Self::new(config, ocr)
    }
}
