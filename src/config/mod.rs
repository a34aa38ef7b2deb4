//! Configuration loading: TOML file, then environment overrides.

pub mod schema;

pub use schema::{AuthConfig, Config, GatewayConfig, StorageConfig};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default location: `<platform config dir>/cadastro/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "cadastro")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Load configuration from `path` (or the default location), falling
    /// back to defaults when no file exists, then apply `CADASTRO_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply overrides looked up by `lookup` (normally the process environment).
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        if let Some(host) = get("CADASTRO_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = get("CADASTRO_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(e) => tracing::warn!("Ignoring CADASTRO_PORT={port}: {e}"),
            }
        }
        if let Some(users_file) = get("CADASTRO_USERS_FILE") {
            self.storage.users_file = users_file;
        }
        if let Some(ttl) = get("CADASTRO_SESSION_TTL_SECS") {
            match ttl.parse() {
                Ok(ttl) => self.auth.session_ttl_secs = ttl,
                Err(e) => tracing::warn!("Ignoring CADASTRO_SESSION_TTL_SECS={ttl}: {e}"),
            }
        }
    }

    /// The user store path with `~` and environment variables expanded.
    pub fn users_file_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.storage.users_file).with_context(|| {
            format!("Failed to expand users_file '{}'", self.storage.users_file)
        })?;
        Ok(PathBuf::from(expanded.as_ref()))
    }

    /// JSON schema of the configuration file.
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(Config);
        serde_json::to_string_pretty(&schema).context("Failed to render config schema")
    }
}
