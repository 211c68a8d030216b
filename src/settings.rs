use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

pub const DEFAULT_OCR_BASE_URL: &str = "https://api.ocr.space";
pub const DEFAULT_LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "qwen/qwen2.5-vl-72b-instruct:free";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    pub ocr_api_key: Option<String>,
    pub ocr_base_url: String,
    pub ocr_engine: u8,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ocr_api_key: None,
            ocr_base_url: DEFAULT_OCR_BASE_URL.to_string(),
            ocr_engine: 2,
            llm_api_key: None,
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            llm_model: DEFAULT_MODEL.to_string(),
            port: DEFAULT_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    ocr: Option<OcrSettings>,
    llm: Option<LlmSettings>,
    server: Option<ServerSettings>,
    upload: Option<UploadSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    api_key: Option<String>,
    base_url: Option<String>,
    engine: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmSettings {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct UploadSettings {
    max_bytes: Option<usize>,
}

/// Loads layered settings files in order, then applies environment
/// overrides. Later sources win.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    settings.apply_env_overrides();
    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(ocr) = incoming.ocr {
            if let Some(key) = ocr.api_key {
                if !key.trim().is_empty() {
                    self.ocr_api_key = Some(key);
                }
            }
            if let Some(url) = ocr.base_url {
                if !url.trim().is_empty() {
                    self.ocr_base_url = url;
                }
            }
            if let Some(engine) = ocr.engine {
                if engine > 0 {
                    self.ocr_engine = engine;
                }
            }
        }
        if let Some(llm) = incoming.llm {
            if let Some(key) = llm.api_key {
                if !key.trim().is_empty() {
                    self.llm_api_key = Some(key);
                }
            }
            if let Some(url) = llm.base_url {
                if !url.trim().is_empty() {
                    self.llm_base_url = url;
                }
            }
            if let Some(model) = llm.model {
                if !model.trim().is_empty() {
                    self.llm_model = model;
                }
            }
        }
        if let Some(server) = incoming.server {
            if let Some(port) = server.port {
                if port > 0 {
                    self.port = port;
                }
            }
        }
        if let Some(upload) = incoming.upload {
            if let Some(max_bytes) = upload.max_bytes {
                if max_bytes > 0 {
                    self.max_upload_bytes = max_bytes;
                }
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(key) = get_env("OCR_SPACE_API_KEY") {
            self.ocr_api_key = Some(key);
        }
        if let Some(url) = get_env("OCR_BASE_URL") {
            self.ocr_base_url = url;
        }
        if let Some(key) = get_env("OPENROUTER_API_KEY").or_else(|| get_env("LLM_API_KEY")) {
            self.llm_api_key = Some(key);
        }
        if let Some(url) = get_env("LLM_BASE_URL") {
            self.llm_base_url = url;
        }
        if let Some(model) = get_env("LLM_MODEL") {
            self.llm_model = model;
        }
        if let Some(port) = get_env("PORT") {
            match port.parse::<u16>() {
                Ok(port) if port > 0 => self.port = port,
                _ => warn!("ignoring invalid PORT value '{}'", port),
            }
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".ocr-proofreader"))
        }
    })
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
