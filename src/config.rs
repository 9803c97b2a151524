use anyhow::Result;
use serde::Deserialize;

use crate::stt::ProviderKind;

/// Environment override for the transcription language.
pub const LANGUAGE_ENV: &str = "DUOSCRIBE_LANG";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub stt: SttConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "duoscribe".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Language code handed to the provider
    pub language: String,
    /// Which provider shape to normalize
    pub provider: ProviderKind,
    /// Stored API key; environment variables are the fallback
    pub api_key: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            provider: ProviderKind::default(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Path to the system-audio capture helper binary
    pub binary_path: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            binary_path: "SystemAudioDump".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file, falling back to defaults.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl SttConfig {
    /// Resolve the API key: stored config first, then the provider's
    /// environment variable. `None` means transcription cannot start.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var(self.provider.api_key_env())
            .ok()
            .filter(|k| !k.is_empty())
    }

    /// Language for a run: environment override, then the caller's request,
    /// then the configured default.
    pub fn effective_language(&self, requested: Option<&str>) -> String {
        if let Ok(lang) = std::env::var(LANGUAGE_ENV) {
            if !lang.is_empty() {
                return lang;
            }
        }
        requested
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .unwrap_or_else(|| self.language.clone())
    }
}
