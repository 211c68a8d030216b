//! Upload intake: one multipart file field becomes an in-memory asset.
//!
//! The declared content type is checked against the allow-list before the
//! body is buffered, and the size ceiling is enforced chunk by chunk so an
//! oversize upload is rejected without buffering the remainder.

use axum::extract::Multipart;

use crate::error::PipelineError;

pub const UPLOAD_FIELD: &str = "image";

const ALLOWED_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
];

/// A single uploaded file, held in memory for the duration of one request.
#[derive(Debug, Clone)]
pub struct UploadedAsset {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub filename: String,
}

impl UploadedAsset {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub fn is_allowed_mime(mime: &str) -> bool {
    ALLOWED_MIMES.contains(&normalize_mime(mime))
}

/// Strips parameters and whitespace: `image/png; charset=binary` → `image/png`.
fn normalize_mime(mime: &str) -> &str {
    mime.split(';').next().unwrap_or(mime).trim()
}

/// Reads the `image` field from a multipart request.
pub async fn read_image_field(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<UploadedAsset, PipelineError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| PipelineError::UploadRead {
            message: err.to_string(),
        })?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let declared = field.content_type().map(|value| value.to_string());
        if let Some(mime) = declared.as_deref() {
            // Reject a bad declared type before buffering anything.
            if normalize_mime(mime) != "application/octet-stream" && !is_allowed_mime(mime) {
                return Err(PipelineError::InvalidMimeType {
                    mime: normalize_mime(mime).to_string(),
                });
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|err| PipelineError::UploadRead {
            message: err.to_string(),
        })? {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(PipelineError::PayloadTooLarge { limit: max_bytes });
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(PipelineError::MissingField {
                field: UPLOAD_FIELD,
            });
        }

        let mime = resolve_mime(declared.as_deref(), &bytes)?;
        return Ok(UploadedAsset {
            bytes,
            mime,
            filename,
        });
    }
    Err(PipelineError::MissingField {
        field: UPLOAD_FIELD,
    })
}

/// Reconciles the declared content type with magic-byte sniffing.
///
/// A declared listed type must not contradict sniffed bytes that resolve to
/// a different listed type; an unlisted or absent declaration can be rescued
/// by sniffing alone.
fn resolve_mime(declared: Option<&str>, bytes: &[u8]) -> Result<String, PipelineError> {
    let sniffed = infer::get(bytes).map(|kind| kind.mime_type());
    match declared.map(normalize_mime) {
        Some(mime) if is_allowed_mime(mime) => {
            if let Some(sniffed) = sniffed {
                if is_allowed_mime(sniffed) && sniffed != mime {
                    return Err(PipelineError::InvalidMimeType {
                        mime: format!("{} (content looks like {})", mime, sniffed),
                    });
                }
            }
            Ok(mime.to_string())
        }
        other => match sniffed {
            Some(sniffed) if is_allowed_mime(sniffed) => Ok(sniffed.to_string()),
            _ => Err(PipelineError::InvalidMimeType {
                mime: other.or(sniffed).unwrap_or("unknown").to_string(),
            }),
        },
    }
}
