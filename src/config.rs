//! Layered application configuration.
//!
//! Values are resolved in order, later layers winning:
//! defaults → `lunear.toml` (or `--config <path>`) → environment (`.env` is
//! loaded first via `dotenvy`) → CLI flags.
//!
//! ```toml
//! environment = "production"
//!
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [database]
//! url = "file:.lunear/lunear.db"
//!
//! [log]
//! format = "json"
//! filter = "lunear=debug,tower_http=info"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "lunear.toml";
pub const DEFAULT_DB_PATH: &str = ".lunear/lunear.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Interpret an `APP_ENV`/`NODE_ENV` value. Anything other than
    /// production runs as development.
    pub fn from_env_value(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" | "test" => Self::Development,
            other => {
                tracing::warn!(value = other, "unrecognised environment, running as development");
                Self::Development
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidValue {
                key: "log.format",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    /// Accepted for parity with hosted deployments; unused for local files.
    pub auth_token: Option<String>,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DEFAULT_DB_PATH.to_string(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub format: Option<LogFormat>,
    pub filter: Option<String>,
}

/// Fully resolved configuration, built once in `main` and passed down.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub log: LogSection,
}

/// CLI-level overrides; `None` leaves the lower layer untouched.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<String>,
    pub verbose: bool,
}

impl AppConfig {
    /// Load configuration from all layers.
    ///
    /// A missing default config file is not an error; a missing file that was
    /// named explicitly is.
    pub fn load(config_file: Option<&Path>, cli: &CliOverrides) -> Result<Self, ConfigError> {
        check_dotenv(dotenvy::dotenv())?;

        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment overrides through a lookup function so tests don't
    /// have to mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("APP_ENV").or_else(|| lookup("NODE_ENV")) {
            self.environment = Environment::from_env_value(&env);
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "server.port",
                value: port.clone(),
            })?;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(token) = lookup("DATABASE_AUTH_TOKEN") {
            self.database.auth_token = Some(token);
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.log.format = Some(format.parse()?);
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(db_path) = &cli.db_path {
            self.database.url = db_path.clone();
        }
        if cli.verbose && self.log.filter.is_none() {
            self.log.filter = Some("lunear=debug,tower_http=debug".to_string());
        }
    }

    /// Resolve `database.url` to a local SQLite path.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        resolve_db_path(&self.database.url)
    }

    pub fn log_format(&self) -> LogFormat {
        match self.log.format {
            Some(format) => format,
            None if self.environment.is_production() => LogFormat::Json,
            None => LogFormat::Pretty,
        }
    }

    pub fn secure_cookies(&self) -> bool {
        self.environment.is_production()
    }
}

/// A missing `.env` is fine; one that cannot be read or parsed is not.
fn check_dotenv<T>(result: Result<T, dotenvy::Error>) -> Result<(), ConfigError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(source) => Err(ConfigError::EnvFile { source }),
    }
}

/// Accepts bare paths and `file:` URLs; rejects remote schemes.
pub fn resolve_db_path(url: &str) -> Result<PathBuf, ConfigError> {
    let url = url.trim();
    if let Some(rest) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    if let Some(rest) = url.strip_prefix("file:") {
        return Ok(PathBuf::from(rest));
    }
    if url.contains("://") {
        return Err(ConfigError::UnsupportedDatabase(url.to_string()));
    }
    if url.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "database.url",
            value: String::new(),
        });
    }
    Ok(PathBuf::from(url))
}
