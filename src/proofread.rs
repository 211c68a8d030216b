//! Proofread streamer: opens a streaming chat-completion request and turns
//! the provider's event stream into [`ProofreadEvent`]s.
//!
//! The response body is never buffered in full; a reader task decodes bytes
//! as they arrive and forwards events over a channel. Dropping the receiver
//! (client gone) ends the task and aborts the upstream connection.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::settings::Settings;
use crate::sse::{EventDecoder, ProofreadEvent};

const SYSTEM_PROMPT: &str = "You proofread OCR output. Remove hard line breaks that fall \
mid-sentence and do not correspond to paragraph boundaries, fix obvious recognition \
mistakes, and wrap complex mathematics in LaTeX delimiters. Preserve the original \
meaning and paragraph structure. Reply with the corrected text only.";

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct ProofreadClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ProofreadClient {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            base_url: settings.llm_base_url.trim_end_matches('/').to_string(),
            api_key: settings.llm_api_key.clone(),
            model: settings.llm_model.clone(),
        }
    }

    /// Opens the upstream stream and returns the decoded event sequence.
    ///
    /// Errors returned here happen before anything has been relayed, so the
    /// caller can still answer with a plain JSON error. Once the stream is
    /// returned, failures surface as a terminal [`ProofreadEvent::Error`].
    pub async fn stream(
        &self,
        ocr_text: &str,
        image_data_url: Option<&str>,
    ) -> Result<ReceiverStream<ProofreadEvent>, PipelineError> {
        let Some(api_key) = self.api_key.clone() else {
            return Err(PipelineError::MissingApiKey {
                provider: "proofreading",
            });
        };

        let body = build_request_body(&self.model, ocr_text, image_data_url);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| PipelineError::LlmUnreachable {
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::LlmRequestFailed {
                status: status.as_u16(),
                message: extract_provider_error(&text).unwrap_or(text),
            });
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(pump_events(response, tx));
        Ok(ReceiverStream::new(rx))
    }
}

/// Reads the upstream body chunk by chunk, decoding as it goes. Returns as
/// soon as a terminal event has been forwarded or the consumer goes away.
async fn pump_events(response: reqwest::Response, tx: mpsc::Sender<ProofreadEvent>) {
    let mut decoder = EventDecoder::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.push(&bytes) {
                    let terminal = event.is_terminal();
                    if tx.send(event).await.is_err() {
                        // Consumer dropped mid-stream; dropping `body` here
                        // aborts the upstream connection.
                        debug!("proofread consumer went away; aborting upstream stream");
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
            }
            Err(err) => {
                warn!("proofread stream broke mid-flight: {}", err);
                let _ = tx.send(ProofreadEvent::Error(err.to_string())).await;
                return;
            }
        }
    }
    if !decoder.is_closed() {
        // Upstream closed without a [DONE] sentinel; treat as completion.
        let _ = tx.send(ProofreadEvent::Done).await;
    }
}

fn build_request_body(
    model: &str,
    ocr_text: &str,
    image_data_url: Option<&str>,
) -> serde_json::Value {
    let instruction = format!("Proofread the following OCR output:\n\n{}", ocr_text);
    let user_content = match image_data_url.and_then(as_data_url) {
        Some(url) => json!([
            {"type": "text", "text": instruction},
            {"type": "image_url", "image_url": {"url": url}},
        ]),
        None => json!(instruction),
    };
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": user_content},
        ],
        "stream": true,
    })
}

/// Browser clients send a full `data:` URL; bare base64 gets validated and
/// wrapped. Anything else is dropped rather than sent upstream to fail
/// opaquely, the proofread still runs on text alone.
fn as_data_url(image: &str) -> Option<String> {
    if image.starts_with("data:") {
        return Some(image.to_string());
    }
    if BASE64.decode(image).is_ok() {
        return Some(format!("data:image/jpeg;base64,{}", image));
    }
    warn!("ignoring image attachment that is neither a data URL nor base64");
    None
}

fn extract_provider_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ProviderError>,
    }

    #[derive(Deserialize)]
    struct ProviderError {
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .error?
        .message
        .filter(|message| !message.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_only_request_is_a_plain_string_message() {
        let body = build_request_body("some/model", "raw ocr", None);
        assert_eq!(body["model"], "some/model");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        let content = body["messages"][1]["content"]
            .as_str()
            .expect("string content");
        assert!(content.contains("raw ocr"));
    }

    #[test]
    fn image_request_attaches_a_data_url_part() {
        let body = build_request_body("some/model", "raw ocr", Some("data:image/png;base64,AAAA"));
        let parts = body["messages"][1]["content"]
            .as_array()
            .expect("content parts");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn bare_base64_is_wrapped_into_a_data_url() {
        assert_eq!(
            as_data_url("AAAA").as_deref(),
            Some("data:image/jpeg;base64,AAAA")
        );
        assert_eq!(
            as_data_url("data:image/gif;base64,BB").as_deref(),
            Some("data:image/gif;base64,BB")
        );
        assert_eq!(as_data_url("not base64!!"), None);
    }

    #[test]
    fn invalid_image_attachment_falls_back_to_text_only() {
        let body = build_request_body("some/model", "raw ocr", Some("not base64!!"));
        assert!(body["messages"][1]["content"].is_string());
    }

    #[test]
    fn provider_error_message_is_extracted() {
        let body = r#"{"error":{"message":"invalid api key","code":401}}"#;
        assert_eq!(
            extract_provider_error(body).as_deref(),
            Some("invalid api key")
        );
        assert_eq!(extract_provider_error("not json"), None);
        assert_eq!(extract_provider_error(r#"{"error":{"message":""}}"#), None);
    }
}
