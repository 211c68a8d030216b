use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct ProofreadRequest {
    pub(crate) ocr_text: Option<String>,
    pub(crate) image_base64: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OcrExtractResponse {
    pub(crate) ocr_text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) ocr_configured: bool,
    pub(crate) llm_configured: bool,
    pub(crate) model: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}
