pub mod error;
pub mod logging;
pub mod ocr;
pub mod proofread;
pub mod server;
pub mod settings;
pub mod sse;
pub mod upload;

pub use error::PipelineError;
pub use ocr::{OcrClient, OcrResult};
pub use proofread::ProofreadClient;
pub use settings::Settings;
pub use sse::ProofreadEvent;
pub use upload::UploadedAsset;
