//! Server configuration, loaded once at startup.

use serde::{Deserialize, Deserializer};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PATH: &str = "/auto-deploy";
pub const DEFAULT_HOST_MARKER: &str = "github.com";
pub const DEFAULT_SCRIPT: &str = "./docker_builder.sh";
pub const DEFAULT_LOG_DIR: &str = "./logs";
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_MAX_TRACKED_BUILDS: usize = 64;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// TCP listen port. Accepts `8000` or `"8000"`.
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    pub host: String,
    /// Route the webhook is served on.
    pub path: String,
    /// Credential spliced into clone URLs. Empty means anonymous.
    pub token: String,
    /// Literal host fragment the token is inserted in front of.
    pub host_marker: String,
    pub script: PathBuf,
    pub log_dir: PathBuf,
    /// Zero disables the build timeout.
    pub build_timeout_secs: u64,
    pub max_tracked_builds: usize,
    pub webhook_secret: Option<String>,
    pub server_log_dir: Option<PathBuf>,
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            path: DEFAULT_PATH.to_string(),
            token: String::new(),
            host_marker: DEFAULT_HOST_MARKER.to_string(),
            script: PathBuf::from(DEFAULT_SCRIPT),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            max_tracked_builds: DEFAULT_MAX_TRACKED_BUILDS,
            webhook_secret: None,
            server_log_dir: None,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl Config {
    /// Parse configuration from a string. TOML when `is_toml`, YAML otherwise.
    pub fn parse(content: &str, is_toml: bool, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = if is_toml {
            toml::from_str(content).map_err(|source| ConfigError::Toml {
                path: origin.to_string(),
                source,
            })?
        } else if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
                path: origin.to_string(),
                source,
            })?
        };
        config.normalized()
    }

    /// Replace empty values with defaults and reject unusable ones.
    fn normalized(mut self) -> Result<Self, ConfigError> {
        if self.path.is_empty() {
            self.path = DEFAULT_PATH.to_string();
        }
        if self.host.is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        if self.host_marker.is_empty() {
            self.host_marker = DEFAULT_HOST_MARKER.to_string();
        }
        if self.script.as_os_str().is_empty() {
            self.script = PathBuf::from(DEFAULT_SCRIPT);
        }
        if self.log_dir.as_os_str().is_empty() {
            self.log_dir = PathBuf::from(DEFAULT_LOG_DIR);
        }
        if self
            .webhook_secret
            .as_ref()
            .is_some_and(|secret| secret.is_empty())
        {
            self.webhook_secret = None;
        }

        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "path '{}' must start with '/'",
                self.path
            )));
        }
        if self.path.contains(['{', '}'])
            || self
                .path
                .split('/')
                .any(|segment| segment.starts_with([':', '*']))
        {
            return Err(ConfigError::Invalid(format!(
                "path '{}' must be a literal route without parameters or wildcards",
                self.path
            )));
        }
        if self.path == "/builds" || self.path.starts_with("/builds/") {
            return Err(ConfigError::Invalid(format!(
                "path '{}' collides with the build status routes",
                self.path
            )));
        }
        if self.max_tracked_builds == 0 {
            return Err(ConfigError::Invalid(
                "max_tracked_builds must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }

    /// Override the configured token, typically from `AUTODEPLOY_TOKEN`.
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.token = token;
        }
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        (self.build_timeout_secs > 0).then(|| Duration::from_secs(self.build_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Load the configuration file, falling back to defaults when it does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<(Config, ConfigSource), ConfigError> {
    let path = path.as_ref();
    let origin = path.display().to_string();

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok((Config::default(), ConfigSource::Defaults));
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: origin,
                source,
            });
        }
    };

    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let config = Config::parse(&content, is_toml, &origin)?;
    Ok((config, ConfigSource::File(path.to_path_buf())))
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        Text(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(port) => Ok(port),
        PortValue::Text(text) if text.trim().is_empty() => Ok(DEFAULT_PORT),
        PortValue::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}
