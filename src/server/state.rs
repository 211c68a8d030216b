use crate::ocr::OcrClient;
use crate::proofread::ProofreadClient;
use crate::settings::Settings;

pub(crate) struct ServerState {
    pub(crate) settings: Settings,
    pub(crate) ocr: OcrClient,
    pub(crate) proofread: ProofreadClient,
}
