use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

use crate::session::{Language, Voice};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// WebSocket endpoint of the Live API
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Microphone,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Speaker,
    Silent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub source: SourceKind,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    pub output: OutputKind,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            frame_size: 4096,
            source: SourceKind::Microphone,
            file_path: None,
            output: OutputKind::Speaker,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    pub voice: Voice,
    pub language: Language,
    pub reconnect_debounce_ms: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            voice: Voice::Zephyr,
            language: Language::De,
            reconnect_debounce_ms: 500,
        }
    }
}

impl Config {
    /// Load `path` (any extension `config` understands) with
    /// `KIOSK_VOICE__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("KIOSK_VOICE").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
