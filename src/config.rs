//! Client configuration.
//!
//! Settings are layered: built-in defaults, then `taskdeck.toml`, then
//! environment variables (a `.env` file is honoured).
//!
//! ```toml
//! api_url = "https://tracker.example.com/api"
//! protocol = "graphql"
//! request_timeout_secs = 30
//! token_file = "/var/lib/taskdeck/session.json"
//!
//! [log]
//! level = "info"
//! json = false
//! directory = "/var/log/taskdeck"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "taskdeck.toml";

pub const ENV_API_URL: &str = "TASKDECK_API_URL";
pub const ENV_PROTOCOL: &str = "TASKDECK_PROTOCOL";
pub const ENV_TOKEN_FILE: &str = "TASKDECK_TOKEN_FILE";
pub const ENV_LOG: &str = "TASKDECK_LOG";

/// Wire protocol spoken by the tracker API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Single `/graphql` endpoint; errors come back as `errors[]` entries.
    #[default]
    Graphql,
    /// Resource endpoints with a `{ data, message, errors }` envelope.
    Rest,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Graphql => write!(f, "graphql"),
            Protocol::Rest => write!(f, "rest"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "graphql" => Ok(Protocol::Graphql),
            "rest" => Ok(Protocol::Rest),
            _ => anyhow::bail!("Invalid protocol '{}'. Valid values: graphql, rest", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub json: bool,
    /// When set, logs also go to a daily rolling file in this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_url: String,
    pub protocol: Protocol,
    pub request_timeout_secs: u64,
    /// Where the access token and username are persisted.
    pub token_file: Option<PathBuf>,
    pub log: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:4000".to_string(),
            protocol: Protocol::default(),
            request_timeout_secs: 30,
            token_file: None,
            log: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskdeck.toml")
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load the layered configuration.
    ///
    /// `path` names an explicit config file; otherwise `taskdeck.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE_NAME).exists() => {
                Self::from_file(Path::new(CONFIG_FILE_NAME))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides. `lookup` is injectable for tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(protocol) = lookup(ENV_PROTOCOL) {
            self.protocol = protocol
                .parse()
                .with_context(|| format!("Invalid {}", ENV_PROTOCOL))?;
        }
        if let Some(path) = lookup(ENV_TOKEN_FILE) {
            self.token_file = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.log.level = level;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Token file location, defaulting to the platform data directory.
    pub fn token_file_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.token_file {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(data_dir.join("taskdeck").join("session.json"))
    }

    /// Absolute URL for a path relative to the API root.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
