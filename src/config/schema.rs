use crate::auth::password::DEFAULT_HASH_ROUNDS;
use crate::auth::session::DEFAULT_SESSION_TTL_SECS;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Top-level configuration, read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allow binding a non-loopback address.
    pub allow_public_bind: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            allow_public_bind: false,
        }
    }
}

/// Where users are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the JSON user file. `~` and `$VARS` are expanded.
    pub users_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            users_file: "usuarios.json".into(),
        }
    }
}

/// Password and session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AuthConfig {
    /// Session lifetime in seconds. `0` keeps sessions until logout.
    pub session_ttl_secs: u64,
    /// PBKDF2 rounds for newly hashed passwords.
    pub hash_rounds: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            hash_rounds: DEFAULT_HASH_ROUNDS,
        }
    }
}
