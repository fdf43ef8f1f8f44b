use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::RETRY_AFTER,
    multipart::{Form, Part},
    Client, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::{ApiKey, MistralConfig};
use crate::error::{MistralOcrError, Result};
use crate::images::decode_image;

use super::models::{
    ApiErrorBody, DocumentChunk, DocumentSource, OcrApiRequest, OcrApiResponse, OcrPage,
    OcrRequest, OcrResult, SignedUrl, UploadedFile,
};
use super::provider::OcrBackend;

/// Hours a signed download URL for an uploaded document stays valid.
const SIGNED_URL_EXPIRY_HOURS: u32 = 24;
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Client for the Mistral files and OCR endpoints.
///
/// A document is uploaded with `purpose=ocr`, exchanged for a signed URL, and
/// that URL is handed to `/ocr` as a `document_url` (PDF) or `image_url`.
#[derive(Clone, Debug)]
pub struct MistralOcrClient {
    client: Client,
    api_key: ApiKey,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl MistralOcrClient {
    pub fn new(config: &MistralConfig) -> Result<Self> {
        if config.api_key.expose().trim().is_empty() {
            return Err(MistralOcrError::Configuration(
                "API key required for Mistral OCR".to_string(),
            ));
        }

        url::Url::parse(&config.base_url).map_err(|e| {
            MistralOcrError::Configuration(format!(
                "Invalid Mistral base URL '{}': {e}",
                config.base_url
            ))
        })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mistral-ocr-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                MistralOcrError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn upload(&self, document: &DocumentSource) -> Result<UploadedFile> {
        let file_name = document.file_name();
        let data = match document {
            DocumentSource::Path(path) => tokio::fs::read(path).await?,
            DocumentSource::Bytes { data, .. } => data.clone(),
        };
        let size = data.len();

        let mime = mime_guess::from_path(&file_name).first_or_octet_stream();
        let part = Part::bytes(data)
            .file_name(file_name.clone())
            .mime_str(mime.essence_str())
            .map_err(|e| {
                MistralOcrError::UnsupportedDocument(format!("Invalid content type: {e}"))
            })?;
        let form = Form::new().text("purpose", "ocr").part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(self.api_key.expose())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let uploaded: UploadedFile = self.parse_json(response).await?;
        debug!(file_id = %uploaded.id, file_name = %file_name, size, "Uploaded document");
        Ok(uploaded)
    }

    async fn signed_url(&self, file_id: &str) -> Result<SignedUrl> {
        let response = self
            .client
            .get(format!("{}/files/{file_id}/url", self.base_url))
            .query(&[("expiry", SIGNED_URL_EXPIRY_HOURS)])
            .bearer_auth(self.api_key.expose())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.parse_json(response).await
    }

    async fn run_ocr(
        &self,
        document_url: String,
        is_pdf: bool,
        include_image_base64: bool,
    ) -> Result<OcrApiResponse> {
        let document = if is_pdf {
            DocumentChunk::DocumentUrl { document_url }
        } else {
            DocumentChunk::ImageUrl {
                image_url: document_url,
            }
        };

        let request = OcrApiRequest {
            model: self.model.clone(),
            document,
            include_image_base64,
        };

        let response = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.parse_json(response).await
    }

    async fn parse_json<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        serde_json::from_slice(&body).map_err(|e| {
            MistralOcrError::UpstreamProtocol(format!("Failed to parse response: {e}"))
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> MistralOcrError {
        if error.is_timeout() {
            MistralOcrError::UpstreamTimeout(self.timeout)
        } else if error.is_decode() {
            MistralOcrError::UpstreamProtocol(error.to_string())
        } else {
            MistralOcrError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl OcrBackend for MistralOcrClient {
    async fn process(&self, request: &OcrRequest) -> Result<OcrResult> {
        let include_images = request.mode.includes_images();
        info!(
            document = %request.document.file_name(),
            include_images,
            model = %self.model,
            "Submitting document to Mistral OCR"
        );

        let uploaded = self.upload(&request.document).await?;
        let signed = self.signed_url(&uploaded.id).await?;
        let response = self
            .run_ocr(signed.url, request.document.is_pdf(), include_images)
            .await?;

        into_ocr_result(response, include_images)
    }
}

fn into_ocr_result(response: OcrApiResponse, include_images: bool) -> Result<OcrResult> {
    let mut pages = Vec::with_capacity(response.pages.len());
    let mut images = Vec::new();

    for page in response.pages {
        if include_images {
            for image in &page.images {
                let payload = image
                    .image_base64
                    .as_deref()
                    .filter(|payload| !payload.is_empty())
                    .ok_or_else(|| {
                        MistralOcrError::UpstreamProtocol(format!(
                            "Image '{}' is missing image_base64 data",
                            image.id
                        ))
                    })?;
                images.push(decode_image(&image.id, page.index, payload)?);
            }
        }

        pages.push(OcrPage {
            index: page.index,
            markdown: page.markdown,
        });
    }

    let pages_processed = response.usage_info.map(|usage| usage.pages_processed);
    Ok(OcrResult::from_pages(
        pages,
        images,
        response.model,
        pages_processed,
    ))
}

async fn error_from_response(response: Response) -> MistralOcrError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    map_status(status, upstream_message(&body), retry_after)
}

/// Maps a non-success status to an error kind. Deterministic in `status`.
pub(crate) fn map_status(
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
) -> MistralOcrError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MistralOcrError::UpstreamAuth(message),
        StatusCode::TOO_MANY_REQUESTS => MistralOcrError::UpstreamRateLimited { retry_after },
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => MistralOcrError::UnsupportedDocument(message),
        status if status.is_server_error() => MistralOcrError::UpstreamServer {
            status: status.as_u16(),
            message,
        },
        status => MistralOcrError::Upstream {
            status: status.as_u16(),
            message,
        },
    }
}

fn upstream_message(body: &str) -> String {
    let from_json = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message.or(parsed.detail))
        .map(|value| match value {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        });

    let message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        return "no error details returned".to_string();
    }

    if message.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let truncated: String = message.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        format!("{truncated}...")
    } else {
        message
    }
}
