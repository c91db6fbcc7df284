use serde::Deserialize;
use std::{fs, path::Path};

use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub rules: Rules,
    #[serde(default)]
    pub vision: VisionSection,
}

fn default_db_path() -> String {
    "data/invoice_points.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Business constants the validation chain and ledger read.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Rules {
    pub min_total_amount: f64,
    pub valid_ncf_prefixes: Vec<String>,
    pub expiry_months: u32,
    pub utc_offset_hours: i8,
    pub default_line: String,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            min_total_amount: 10.0,
            valid_ncf_prefixes: vec!["B01".to_string(), "B02".to_string(), "E".to_string()],
            expiry_months: 12,
            utc_offset_hours: -4,
            default_line: "General".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VisionBackend {
    #[default]
    Remote,
    Ollama,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionSection {
    pub backend: VisionBackend,
    pub timeout_secs: u64,
    pub remote: EndpointConfig,
    pub ollama: EndpointConfig,
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            backend: VisionBackend::Remote,
            timeout_secs: 120,
            remote: EndpointConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key_env: Some("VISION_API_KEY".to_string()),
            },
            ollama: EndpointConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                model: "llava".to_string(),
                api_key_env: None,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
