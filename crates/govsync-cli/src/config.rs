//! Layered configuration: `govsync.toml`, then `GOVSYNC__*` environment overrides.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use govsync_api::HttpApiConfig;
use govsync_engine::EngineConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "govsync.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(flatten)]
    pub http: HttpApiConfig,
    /// Environment variable holding the bearer token. Used when `token` is unset.
    #[serde(default)]
    pub token_env: Option<String>,
}

impl ApiSettings {
    /// Client settings with the token resolved.
    pub fn client_config(&self) -> Result<HttpApiConfig, String> {
        let mut http = self.http.clone();
        if http.token.is_none()
            && let Some(var) = &self.token_env
        {
            let token = std::env::var(var)
                .map_err(|_| format!("api.token_env names '{var}', which is not set"))?;
            http.token = Some(token);
        }
        Ok(http)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.api.http.validate()?;
        if let Some(var) = &self.api.token_env
            && var.trim().is_empty()
        {
            return Err("api.token_env must not be empty".into());
        }
        self.engine.validate()?;
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Loads the configuration from `path` (or `govsync.toml`) and the environment.
///
/// A missing file is not an error; every setting has a default.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, String> {
    let mut builder = Config::builder();
    let path = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), Path::to_path_buf);
    if path.exists() {
        builder = builder.add_source(File::from(path));
    }
    // e.g. GOVSYNC__ENGINE__RETRY__MAX_ATTEMPTS=3
    builder = builder.add_source(
        Environment::with_prefix("GOVSYNC")
            .try_parsing(true)
            .separator("__"),
    );
    let cfg = builder
        .build()
        .map_err(|e| format!("config build error: {e}"))?;
    let merged: AppConfig = cfg
        .try_deserialize()
        .map_err(|e| format!("config deserialize error: {e}"))?;
    merged.validate()?;
    Ok(merged)
}
