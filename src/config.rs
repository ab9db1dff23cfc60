use crate::error::{AppError, Result};
use crate::providers::ProviderPreset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the pre-built single-page app.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub pin: PinConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model identifier sent upstream with every request.
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinConfig {
    /// Environment variable holding the shared access code.
    #[serde(default = "default_pin_env")]
    pub env: String,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            env: default_pin_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Wire framing of the caller-facing stream: plain text deltas or SSE.
    #[serde(default)]
    pub format: StreamFormat,
    /// Abort a stream when the upstream sends nothing for this long.
    #[serde(default = "default_idle_read_secs")]
    pub idle_read_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            format: StreamFormat::default(),
            idle_read_secs: default_idle_read_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Text,
    Sse,
}

/// Provider endpoint with its secret resolved from the environment.
/// Built once at process entry and injected into the relay; request handlers
/// never touch the environment themselves.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

fn default_port() -> u16 {
    3001
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

fn default_pin_env() -> String {
    "APP_PIN_CODE".to_string()
}

fn default_idle_read_secs() -> u64 {
    30
}

impl AppConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(AppError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Resolve the effective base URL (config override or provider preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.provider.base_url {
            return Ok(url.clone());
        }

        let preset = ProviderPreset::from_name(&self.provider.name).ok_or_else(|| {
            AppError::config(format!(
                "Unknown provider '{}' and no base_url configured. \
                 Known providers: openai, openrouter, fireworks, together, groq, deepseek",
                self.provider.name
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Resolve endpoint, API key, and model once, at process entry.
    pub fn resolve_provider(&self) -> Result<ResolvedProvider> {
        let base_url = self.effective_base_url()?;
        let api_key = std::env::var(&self.provider.api_key_env).map_err(|_| {
            AppError::config(format!(
                "Environment variable '{}' not set. Set it with your provider API key.",
                self.provider.api_key_env
            ))
        })?;

        Ok(ResolvedProvider {
            base_url,
            api_key,
            model: self.provider.model.clone(),
        })
    }

    /// Resolve the shared PIN code from the configured environment variable
    pub fn resolve_pin(&self) -> Result<String> {
        std::env::var(&self.pin.env).map_err(|_| {
            AppError::config(format!(
                "Environment variable '{}' not set. Set it with the access PIN.",
                self.pin.env
            ))
        })
    }

    pub fn idle_read_timeout(&self) -> Duration {
        Duration::from_secs(self.stream.idle_read_secs)
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("pinchat.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("pinchat")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("pinchat").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("pinchat").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".pinchat.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
