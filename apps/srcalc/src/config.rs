//! # Configuration
//!
//! TOML configuration with a default for every field. Precedence:
//! command line > environment > config file > defaults.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! api_key = "change-me"
//! rate_limit_per_second = 20
//!
//! [storage]
//! db_path = "srcalc.redb"
//!
//! [vista]
//! duz = "11716"
//! division = "500"
//! fixture = "demos/vista-fixture.json"
//! health_factors = ["CURRENT SMOKER"]
//!
//! [logging]
//! filter = "srcalc=info,tower_http=info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vista: VistaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Required in the `x-api-key` header when set.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VistaConfig {
    /// The VistA user the calculator acts as.
    #[serde(default = "default_duz")]
    pub duz: String,
    #[serde(default = "default_division")]
    pub division: String,
    /// Scripted RPC responses. Without one, every patient lookup fails.
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    /// Health factors kept when loading a patient.
    #[serde(default = "default_health_factors")]
    pub health_factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives. `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_rate_limit() -> u32 {
    20
}

fn default_db_path() -> PathBuf {
    PathBuf::from("srcalc.redb")
}

fn default_duz() -> String {
    "0".to_string()
}

fn default_division() -> String {
    "500".to_string()
}

fn default_health_factors() -> Vec<String> {
    [
        "CURRENT SMOKER",
        "FORMER SMOKER",
        "ALCOHOL USE",
        "DEPENDENT FUNCTIONAL STATUS",
        "PARTIALLY DEPENDENT FUNCTIONAL STATUS",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_log_filter() -> String {
    "srcalc=info,srcalc_core=info,tower_http=info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
            rate_limit_per_second: default_rate_limit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for VistaConfig {
    fn default() -> Self {
        Self {
            duz: default_duz(),
            division: default_division(),
            fixture: None,
            health_factors: default_health_factors(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Read a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the config file if given, else `srcalc.toml` when present, else
    /// defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new("srcalc.toml").exists() => Self::from_file("srcalc.toml")?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `SRCALC_*` overrides.
    pub fn apply_env(
        &mut self,
        var: impl Fn(&'static str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = var("SRCALC_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(port) = var("SRCALC_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::Env {
                name: "SRCALC_PORT",
                value: port,
            })?;
        }
        if let Some(key) = var("SRCALC_API_KEY") {
            self.server.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(duz) = var("SRCALC_DUZ") {
            self.vista.duz = duz;
        }
        if let Some(fixture) = var("SRCALC_VISTA_FIXTURE") {
            self.vista.fixture = Some(PathBuf::from(fixture));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 8080);
        assert!(config.server.api_key.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [vista]
            duz = "11716"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.vista.duz, "11716");
        assert_eq!(config.vista.division, "500");
        assert!(!config.vista.health_factors.is_empty());
    }

    #[test]
    fn env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(|name| match name {
                "SRCALC_PORT" => Some("7000".to_string()),
                "SRCALC_API_KEY" => Some("secret".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.api_key.as_deref(), Some("secret"));

        let bad = config.apply_env(|name| (name == "SRCALC_PORT").then(|| "port".to_string()));
        assert!(matches!(bad, Err(ConfigError::Env { .. })));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            AppConfig::from_file("/nonexistent/srcalc.toml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
