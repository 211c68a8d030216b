//! OCR invoker: sends an uploaded asset to the OCR provider and extracts
//! plain text from its JSON response.

use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::settings::Settings;
use crate::upload::UploadedAsset;

// The provider's public demo key; real deployments configure their own.
const DEMO_API_KEY: &str = "helloworld";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Text extracted from one upload. Immutable; owned by the request that
/// produced it.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct OcrClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    engine: u8,
}

impl OcrClient {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            base_url: settings.ocr_base_url.trim_end_matches('/').to_string(),
            api_key: settings
                .ocr_api_key
                .clone()
                .unwrap_or_else(|| DEMO_API_KEY.to_string()),
            engine: settings.ocr_engine,
        }
    }

    /// Runs the provider once, with a single retry on connect or timeout
    /// failures.
    ///
    /// Output text is trimmed of leading/trailing whitespace; interior line
    /// structure is left alone, repairing awkward mid-sentence breaks is the
    /// proofreader's job.
    pub async fn recognize(&self, asset: &UploadedAsset) -> Result<OcrResult, PipelineError> {
        debug!("submitting {} byte {} upload to OCR", asset.len(), asset.mime);
        let response = match self.send(asset).await {
            Ok(response) => response,
            Err(err) if err.is_connect() || err.is_timeout() => {
                warn!("OCR request failed ({}); retrying once", err);
                sleep(TRANSPORT_RETRY_DELAY).await;
                self.send(asset)
                    .await
                    .map_err(|err| PipelineError::OcrUnreachable {
                        message: err.to_string(),
                    })?
            }
            // Anything else (a request that could not be built, a broken
            // response) will not get better on a second attempt.
            Err(err) => {
                return Err(PipelineError::OcrUnreachable {
                    message: err.to_string(),
                });
            }
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| PipelineError::OcrUnreachable {
                message: err.to_string(),
            })?;
        if !status.is_success() {
            return Err(PipelineError::OcrProcessingFailed {
                message: format!("provider returned {}: {}", status, body),
            });
        }
        parse_ocr_body(&body)
    }

    async fn send(&self, asset: &UploadedAsset) -> Result<reqwest::Response, reqwest::Error> {
        let part = multipart::Part::bytes(asset.bytes.clone())
            .file_name(asset.filename.clone())
            .mime_str(&asset.mime)?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("OCREngine", self.engine.to_string())
            .text("detectOrientation", "true")
            .text("scale", "true")
            .text("language", "auto");
        self.client
            .post(format!("{}/parse/image", self.base_url))
            .header("apikey", self.api_key.clone())
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    #[serde(default)]
    is_errored_on_processing: bool,
    error_message: Option<ErrorMessage>,
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
}

// The provider reports ErrorMessage as either a string or a list of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl ErrorMessage {
    fn join(self) -> String {
        match self {
            ErrorMessage::One(message) => message,
            ErrorMessage::Many(messages) => messages.join("; "),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    parsed_text: Option<String>,
}

fn parse_ocr_body(body: &str) -> Result<OcrResult, PipelineError> {
    let payload: OcrResponse =
        serde_json::from_str(body).map_err(|err| PipelineError::OcrProcessingFailed {
            message: format!("unexpected response shape: {}", err),
        })?;
    if payload.is_errored_on_processing {
        let message = payload
            .error_message
            .map(ErrorMessage::join)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| "unspecified OCR failure".to_string());
        return Err(PipelineError::OcrProcessingFailed { message });
    }
    let text = payload
        .parsed_results
        .into_iter()
        .filter_map(|result| result.parsed_text)
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() {
        return Err(PipelineError::NoTextDetected);
    }
    Ok(OcrResult {
        text: text.to_string(),
    })
}
