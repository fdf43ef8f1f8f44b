use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MistralConfig;
use crate::error::{MistralOcrError, Result};

use super::api::MistralOcrClient;
use super::models::{OcrRequest, OcrResult};

/// Longest wait between retries, whatever `Retry-After` says.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Submits one document to an OCR service and returns its result.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn process(&self, request: &OcrRequest) -> Result<OcrResult>;
}

#[derive(Clone)]
pub struct OcrProvider {
    backend: Arc<dyn OcrBackend>,
    timeout: Duration,
    max_retries: u32,
}

impl OcrProvider {
    pub fn new(config: &MistralConfig) -> Result<Self> {
        let client = MistralOcrClient::new(config)?;
        info!(model = %config.model, base_url = %client.base_url(), "Mistral OCR backend initialized");

        Ok(Self::with_backend(
            Arc::new(client),
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        ))
    }

    pub fn with_backend(backend: Arc<dyn OcrBackend>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            backend,
            timeout,
            max_retries,
        }
    }

    /// Runs the request under the configured timeout, aborting with
    /// [`MistralOcrError::Cancelled`] when `cancel` fires. Retryable failures
    /// are re-submitted at most `max_retries` times.
    pub async fn process(
        &self,
        request: &OcrRequest,
        cancel: &CancellationToken,
    ) -> Result<OcrResult> {
        let mut attempt: u32 = 0;

        loop {
            match self.process_once(request, cancel).await {
                Ok(result) => return Ok(result),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = retry_delay(&error, attempt);
                    warn!(
                        error = %error,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "OCR request failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(MistralOcrError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn process_once(
        &self,
        request: &OcrRequest,
        cancel: &CancellationToken,
    ) -> Result<OcrResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MistralOcrError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.backend.process(request)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(MistralOcrError::UpstreamTimeout(self.timeout)),
                }
            }
        }
    }
}

fn retry_delay(error: &MistralOcrError, attempt: u32) -> Duration {
    let backoff = Duration::from_millis(100 * 2_u64.pow(attempt.min(8)));
    match error {
        MistralOcrError::UpstreamRateLimited {
            retry_after: Some(retry_after),
        } => (*retry_after).min(MAX_RETRY_DELAY),
        _ => backoff.min(MAX_RETRY_DELAY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{DocumentSource, OutputMode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyBackend {
        calls: AtomicUsize,
        failures: usize,
        error: fn() -> MistralOcrError,
    }

    #[async_trait]
    impl OcrBackend for FlakyBackend {
        async fn process(&self, _request: &OcrRequest) -> Result<OcrResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.error)());
            }
            Ok(OcrResult {
                markdown: "# done".to_string(),
                ..Default::default()
            })
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl OcrBackend for SlowBackend {
        async fn process(&self, _request: &OcrRequest) -> Result<OcrResult> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(OcrResult::default())
        }
    }

    fn request() -> OcrRequest {
        OcrRequest::new(
            DocumentSource::Bytes {
                file_name: "scan.png".to_string(),
                data: vec![0x89, 0x50],
            },
            OutputMode::MarkdownOnly,
        )
    }

    fn flaky(failures: usize, error: fn() -> MistralOcrError) -> Arc<FlakyBackend> {
        Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            failures,
            error,
        })
    }

    fn server_error() -> MistralOcrError {
        MistralOcrError::UpstreamServer {
            status: 502,
            message: "bad gateway".to_string(),
        }
    }

    #[test]
    fn test_provider_requires_api_key() {
        let result = OcrProvider::new(&MistralConfig::new(""));
        assert!(matches!(result, Err(MistralOcrError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_failures_surface_without_retries_by_default() {
        let backend = flaky(1, server_error);
        let provider = OcrProvider::with_backend(backend.clone(), Duration::from_secs(5), 0);

        let result = provider.process(&request(), &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(MistralOcrError::UpstreamServer { status: 502, .. })
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried_when_enabled() {
        let backend = flaky(2, server_error);
        let provider = OcrProvider::with_backend(backend.clone(), Duration::from_secs(5), 2);

        let result = provider
            .process(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.markdown, "# done");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unsupported_document_is_never_retried() {
        let backend = flaky(1, || MistralOcrError::UnsupportedDocument("corrupt".into()));
        let provider = OcrProvider::with_backend(backend.clone(), Duration::from_secs(5), 3);

        let result = provider.process(&request(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(MistralOcrError::UnsupportedDocument(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_upstream_timeout() {
        let provider =
            OcrProvider::with_backend(Arc::new(SlowBackend), Duration::from_millis(20), 0);

        let result = provider.process(&request(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(MistralOcrError::UpstreamTimeout(_))));
    }

    #[tokio::test]
    async fn test_cancellation_maps_to_cancelled() {
        let provider = OcrProvider::with_backend(Arc::new(SlowBackend), Duration::from_secs(60), 0);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = provider.process(&request(), &token).await;

        assert!(matches!(result, Err(MistralOcrError::Cancelled)));
    }

    #[test]
    fn test_retry_delay_honours_retry_after_with_cap() {
        let limited = MistralOcrError::UpstreamRateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        let greedy = MistralOcrError::UpstreamRateLimited {
            retry_after: Some(Duration::from_secs(600)),
        };

        assert_eq!(retry_delay(&limited, 1), Duration::from_secs(2));
        assert_eq!(retry_delay(&greedy, 1), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(&server_error(), 1), Duration::from_millis(200));
    }
}
