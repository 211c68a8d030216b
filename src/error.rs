use axum::http::StatusCode;
use thiserror::Error;

/// Everything that can go wrong between upload intake and the first relayed
/// byte. Each variant maps to one HTTP status so handlers can answer with a
/// plain JSON error while headers are still uncommitted.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported content type '{mime}'")]
    InvalidMimeType { mime: String },

    #[error("file exceeds the {limit} byte upload limit")]
    PayloadTooLarge { limit: usize },

    #[error("'{field}' is required")]
    MissingField { field: &'static str },

    #[error("failed to read upload: {message}")]
    UploadRead { message: String },

    #[error("{provider} API key not configured")]
    MissingApiKey { provider: &'static str },

    #[error("OCR provider failed: {message}")]
    OcrProcessingFailed { message: String },

    #[error("no text detected in the image")]
    NoTextDetected,

    #[error("OCR provider unreachable: {message}")]
    OcrUnreachable { message: String },

    #[error("proofreading provider returned {status}: {message}")]
    LlmRequestFailed { status: u16, message: String },

    #[error("proofreading provider unreachable: {message}")]
    LlmUnreachable { message: String },
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::InvalidMimeType { .. }
            | PipelineError::MissingField { .. }
            | PipelineError::UploadRead { .. } => StatusCode::BAD_REQUEST,
            PipelineError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PipelineError::MissingApiKey { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::NoTextDetected => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::OcrProcessingFailed { .. }
            | PipelineError::OcrUnreachable { .. }
            | PipelineError::LlmRequestFailed { .. }
            | PipelineError::LlmUnreachable { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}
