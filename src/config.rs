use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::constants::{analysis, oracle, server};
use crate::error::ConfigError;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: server::DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: server::DEFAULT_DATABASE_PATH.to_string(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub http_referer: Option<String>,
    pub app_title: Option<String>,
    pub timeout_secs: u64,
    /// Serve a fixed demo plan instead of calling the model.
    pub demo: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: oracle::DEFAULT_MODEL.to_string(),
            http_referer: None,
            app_title: None,
            timeout_secs: oracle::REQUEST_TIMEOUT.as_secs(),
            demo: false,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Keeps the API key out of startup logs.
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("http_referer", &self.http_referer)
            .field("app_title", &self.app_title)
            .field("timeout_secs", &self.timeout_secs)
            .field("demo", &self.demo)
            .finish()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub session_cookie: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_cookie: server::DEFAULT_SESSION_COOKIE.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub confidence_threshold: f64,
    pub history_limit: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: analysis::CONFIDENCE_THRESHOLD,
            history_limit: analysis::HISTORY_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    /// Loads `config.yaml` (or `$CHARTLAB_CONFIG`), then applies env overrides.
    ///
    /// A missing file is not an error: every section has defaults and the
    /// secrets normally arrive through the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CHARTLAB_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
                path: config_path.clone(),
                source,
            })?;
            Self::from_yaml(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // Strip BOM if present
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Overrides file values with environment variables, when set.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OPENROUTER_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = lookup("OPENROUTER_BASE") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = lookup("QWEN_VL_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("OPENROUTER_HTTP_REFERER") {
            self.llm.http_referer = Some(v);
        }
        if let Some(v) = lookup("OPENROUTER_X_TITLE") {
            self.llm.app_title = Some(v);
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = lookup("BIND_ADDR") {
            self.server.bind_addr = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.analysis.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid {
                field: "analysis.confidence_threshold".to_string(),
                reason: format!("{} is outside [0, 1]", threshold),
            });
        }
        if self.analysis.history_limit == 0 || self.analysis.history_limit > analysis::MAX_HISTORY_LIMIT {
            return Err(ConfigError::Invalid {
                field: "analysis.history_limit".to_string(),
                reason: format!("must be between 1 and {}", analysis::MAX_HISTORY_LIMIT),
            });
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "llm.timeout_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if !self.llm.demo && self.llm.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid {
                field: "llm.api_key".to_string(),
                reason: "set OPENROUTER_API_KEY or enable llm.demo".to_string(),
            });
        }
        Ok(())
    }

    /// Clamps a requested history size to the configured bounds.
    pub fn history_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.analysis.history_limit)
            .clamp(1, analysis::MAX_HISTORY_LIMIT)
    }
}
