use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    /// Bot token. The relay refuses to start without one.
    #[serde(default)]
    pub bot_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// No timeout unless set; a hung call only stalls its own message.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            primary_model: default_primary_model(),
            fallback_model: default_fallback_model(),
            base_url: default_base_url(),
            max_output_tokens: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_primary_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_fallback_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] but with an injectable env lookup.
    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => Config::default(),
        };

        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset, matching how hosting dashboards behave.
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty("TELEGRAM_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(key) = non_empty("GOOGLE_API_KEY") {
            self.gemini.api_key = key;
        }
        if let Some(model) = non_empty("GEMINI_PRIMARY_MODEL") {
            self.gemini.primary_model = model;
        }
        if let Some(model) = non_empty("GEMINI_FALLBACK_MODEL") {
            self.gemini.fallback_model = model;
        }
        if let Some(port) = non_empty("PORT") {
            self.server.port = parse_port(&port, self.server.port);
        }
    }

    /// Liveness port from `PORT` alone, for when the full config is unusable.
    pub fn port_from_env() -> u16 {
        Self::port_from_env_with(|key| std::env::var(key).ok())
    }

    pub fn port_from_env_with<F>(env: F) -> u16
    where
        F: Fn(&str) -> Option<String>,
    {
        match env("PORT").filter(|v| !v.trim().is_empty()) {
            Some(port) => parse_port(&port, DEFAULT_PORT),
            None => DEFAULT_PORT,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.gemini.primary_model.trim().is_empty() {
            anyhow::bail!("gemini.primary_model must not be empty");
        }
        if self.gemini.fallback_model.trim().is_empty() {
            anyhow::bail!("gemini.fallback_model must not be empty");
        }
        if self.gemini.primary_model == self.gemini.fallback_model {
            warn!(
                "Primary and fallback model are both '{}'; the fallback tier adds no redundancy",
                self.gemini.primary_model
            );
        }
        Ok(())
    }

    /// The Telegram token, if one was configured and is non-blank.
    pub fn telegram_token(&self) -> Option<&str> {
        self.telegram
            .bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    /// The Telegram token, or an error when the relay cannot start.
    pub fn require_telegram_token(&self) -> Result<&str> {
        self.telegram_token()
            .context("TELEGRAM_TOKEN is required to start the relay")
    }
}

/// Parse a port value, keeping `current` when it is not a valid port.
fn parse_port(value: &str, current: u16) -> u16 {
    match value.trim().parse::<u16>() {
        Ok(port) => port,
        Err(e) => {
            warn!("Ignoring invalid PORT {:?} ({}), keeping {}", value, e, current);
            current
        }
    }
}
