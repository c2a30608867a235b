//! Reader configuration loaded from a TOML file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// What happens when a navigation is requested while another is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavigationPolicy {
    /// The newest request wins; responses to older ones are dropped.
    #[default]
    LatestWins,
    /// Requests issued while navigating fail with a busy error.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub server: ServerConfig,
    pub navigation: NavigationConfig,
    pub input: InputConfig,
    pub display: DisplayConfig,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "request_timeout_secs")]
    pub request_timeout: Duration,
    /// Raw `Cookie` header value forwarded with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_owned(),
            request_timeout: Duration::from_secs(30),
            cookie: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub policy: NavigationPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Minimum horizontal drag, in terminal columns, that counts as a swipe.
    pub swipe_threshold: u16,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { swipe_threshold: 6 }
    }
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "error_banner_secs")]
    pub error_banner: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "unload_grace_ms")]
    pub unload_grace: Duration,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            error_banner: Duration::from_secs(5),
            unload_grace: Duration::from_millis(300),
        }
    }
}

impl ReaderConfig {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ReaderConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ReaderConfig::default());
        assert_eq!(config.navigation.policy, NavigationPolicy::LatestWins);
        assert_eq!(config.input.swipe_threshold, 6);
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[server]
base_url = "https://books.example.org"
request_timeout_secs = 5

[navigation]
policy = "reject"
"#,
        )
        .unwrap();

        let config = ReaderConfig::load(&path).unwrap();
        assert_eq!(config.server.base_url, "https://books.example.org");
        assert_eq!(config.server.request_timeout, Duration::from_secs(5));
        assert!(config.server.cookie.is_none());
        assert_eq!(config.navigation.policy, NavigationPolicy::Reject);
        assert_eq!(config.display, DisplayConfig::default());
    }

    #[test]
    fn invalid_toml_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[navigation]\npolicy = \"sideways\"\n").unwrap();

        let err = ReaderConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }
}
