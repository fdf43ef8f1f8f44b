use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{MistralOcrError, Result};
use crate::images::{rewrite_image_references, save_images, SavedImage};
use crate::ocr::{DocumentSource, OcrProvider, OcrRequest, OutputMode};
use crate::sandbox::{validate_document_path, PathSandbox};

/// Markdown whose image links point at files written under `output_dir`.
#[derive(Debug, Clone)]
pub struct MarkdownWithImages {
    pub markdown: String,
    pub output_dir: PathBuf,
    pub images: Vec<SavedImage>,
}

#[derive(Clone)]
pub struct ExtractionService {
    ocr: OcrProvider,
    sandbox: Option<Arc<PathSandbox>>,
}

impl ExtractionService {
    pub fn new(ocr: OcrProvider, sandbox: Option<PathSandbox>) -> Self {
        Self {
            ocr,
            sandbox: sandbox.map(Arc::new),
        }
    }

    pub fn images_enabled(&self) -> bool {
        self.sandbox.is_some()
    }

    pub async fn extract_markdown(
        &self,
        file_path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let document = validate_document_path(file_path)?;
        let request = OcrRequest::new(DocumentSource::Path(document), OutputMode::MarkdownOnly);

        let result = self.ocr.process(&request, cancel).await?;

        info!(
            document = %request.document.file_name(),
            pages = result.pages.len(),
            markdown_len = result.markdown.len(),
            "Extracted markdown"
        );
        Ok(result.markdown)
    }

    /// Runs OCR with image extraction and writes the images under the guarded
    /// `output_dir`. Either every image is written or none is.
    pub async fn extract_markdown_with_images(
        &self,
        file_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<MarkdownWithImages> {
        let sandbox = self.sandbox.clone().ok_or_else(|| {
            MistralOcrError::Configuration(
                "MISTRAL_OCR_ALLOWED_DIR is not set; extract_markdown_with_images is disabled"
                    .to_string(),
            )
        })?;

        let document = validate_document_path(file_path)?;

        let requested = output_dir.as_ref().to_path_buf();
        let output_dir = tokio::task::spawn_blocking(move || sandbox.guard_output_dir(&requested))
            .await
            .map_err(|e| MistralOcrError::Io(std::io::Error::other(e)))??;

        let request = OcrRequest::new(
            DocumentSource::Path(document),
            OutputMode::MarkdownWithImages,
        );
        let result = self.ocr.process(&request, cancel).await?;

        if cancel.is_cancelled() {
            return Err(MistralOcrError::Cancelled);
        }

        let stem = request.document.stem();
        let dir = output_dir.clone();
        let images = result.images;
        let saved = tokio::task::spawn_blocking(move || save_images(&dir, &stem, &images))
            .await
            .map_err(|e| MistralOcrError::Image(format!("Image writer task failed: {e}")))??;

        let markdown = rewrite_image_references(&result.markdown, &saved);

        info!(
            document = %request.document.file_name(),
            pages = result.pages.len(),
            images = saved.len(),
            output_dir = %output_dir.display(),
            "Extracted markdown with images"
        );

        Ok(MarkdownWithImages {
            markdown,
            output_dir,
            images: saved,
        })
    }
}
