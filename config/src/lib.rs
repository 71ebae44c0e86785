//! Teleton configuration: `~/.teleton/config.yaml` schema-validated, with
//! `TELETON_*` environment overrides and a `.env` filler.
//!
//! Precedence per key: **process env > .env (agent root) > config.yaml >
//! default**. Validation failures are fatal at startup (exit code 2 in the
//! daemon).

mod dotenv;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Read(std::io::Error),
    #[error("parse config.yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid {key}: {message}")]
    Invalid { key: String, message: String },
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.into(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebUiConfig {
    pub enabled: bool,
    pub port: u16,
    pub host: String,
    /// Control-plane auth token; the daemon generates an ephemeral one when
    /// absent.
    pub token: Option<String>,
}

impl Default for WebUiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8787,
            host: "127.0.0.1".to_string(),
            token: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelegramConfig {
    pub api_id: Option<i64>,
    pub api_hash: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// LLM provider API key.
    pub api_key: Option<String>,
    pub model: String,
    pub embedding_model: String,
    /// Optional OpenAI-compatible base URL.
    pub base_url: Option<String>,
    pub max_agentic_iterations: u32,
    pub owner_name: Option<String>,
    pub telegram: TelegramConfig,
    pub webui: WebUiConfig,
    pub tavily_api_key: Option<String>,
    pub tonapi_key: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            base_url: None,
            max_agentic_iterations: 5,
            owner_name: None,
            telegram: TelegramConfig::default(),
            webui: WebUiConfig::default(),
            tavily_api_key: None,
            tonapi_key: None,
        }
    }
}

/// Default agent root: `~/.teleton`.
pub fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".teleton")
}

impl AgentConfig {
    /// Loads and validates the configuration for an agent root.
    pub fn load(root: &Path) -> Result<AgentConfig, ConfigError> {
        let path = root.join("config.yaml");
        let mut config = if path.exists() {
            check_permissions(&path);
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Read)?;
            serde_yaml::from_str(&content)?
        } else {
            AgentConfig::default()
        };

        let dotenv = dotenv::load_env_map(root).map_err(ConfigError::Read)?;
        config.apply_env(&dotenv)?;
        config.validate()?;
        Ok(config)
    }

    /// Value for a `TELETON_*` key: process env wins, `.env` fills gaps.
    fn env_value(dotenv: &HashMap<String, String>, key: &str) -> Option<String> {
        std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
    }

    fn apply_env(&mut self, dotenv: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(v) = Self::env_value(dotenv, "TELETON_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = Self::env_value(dotenv, "TELETON_TG_API_ID") {
            let id = v
                .parse::<i64>()
                .map_err(|_| invalid("TELETON_TG_API_ID", "must be an integer"))?;
            self.telegram.api_id = Some(id);
        }
        if let Some(v) = Self::env_value(dotenv, "TELETON_TG_API_HASH") {
            self.telegram.api_hash = Some(v);
        }
        if let Some(v) = Self::env_value(dotenv, "TELETON_TG_PHONE") {
            self.telegram.phone = Some(v);
        }
        if let Some(v) = Self::env_value(dotenv, "TELETON_WEBUI_ENABLED") {
            self.webui.enabled = match v.to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(invalid(
                        "TELETON_WEBUI_ENABLED",
                        format!("expected boolean, got '{}'", other),
                    ))
                }
            };
        }
        if let Some(v) = Self::env_value(dotenv, "TELETON_WEBUI_PORT") {
            self.webui.port = v
                .parse::<u16>()
                .map_err(|_| invalid("TELETON_WEBUI_PORT", "must be a port number"))?;
        }
        if let Some(v) = Self::env_value(dotenv, "TELETON_WEBUI_HOST") {
            self.webui.host = v;
        }
        if let Some(v) = Self::env_value(dotenv, "TELETON_WEBUI_TOKEN") {
            self.webui.token = Some(v);
        }
        if let Some(v) = Self::env_value(dotenv, "TELETON_BASE_URL") {
            self.base_url = Some(v);
        }
        if let Some(v) = Self::env_value(dotenv, "TELETON_TAVILY_API_KEY") {
            self.tavily_api_key = Some(v);
        }
        if let Some(v) = Self::env_value(dotenv, "TELETON_TONAPI_KEY") {
            self.tonapi_key = Some(v);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.webui.port < 1024 {
            return Err(invalid(
                "webui.port",
                format!("must be 1024..=65535, got {}", self.webui.port),
            ));
        }
        if !is_loopback_host(&self.webui.host) {
            warn!(
                host = %self.webui.host,
                "webui host is not loopback; the control plane will be reachable from the network"
            );
        }
        if let Some(url) = &self.base_url {
            Url::parse(url).map_err(|e| invalid("base_url", e.to_string()))?;
        }
        if !(1..=50).contains(&self.max_agentic_iterations) {
            return Err(invalid(
                "max_agentic_iterations",
                format!("must be 1..=50, got {}", self.max_agentic_iterations),
            ));
        }
        Ok(())
    }
}

fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    host.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Warns when `config.yaml` is readable by others; secrets live in it.
#[cfg(unix)]
fn check_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{:o}", mode),
                "config.yaml is group/world readable; expected 0600"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, content: &str) {
        std::fs::write(dir.join("config.yaml"), content).unwrap();
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load(dir.path()).unwrap();
        assert_eq!(config.webui.port, 8787);
        assert!(config.webui.enabled);
        assert_eq!(config.max_agentic_iterations, 5);
    }

    #[test]
    fn yaml_values_load() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "model: gpt-test\nwebui:\n  port: 9000\n  host: 127.0.0.1\nowner_name: Alice\n",
        );
        let config = AgentConfig::load(dir.path()).unwrap();
        assert_eq!(config.model, "gpt-test");
        assert_eq!(config.webui.port, 9000);
        assert_eq!(config.owner_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "modle: typo\n");
        assert!(matches!(
            AgentConfig::load(dir.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn dotenv_fills_unset_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "TELETON_WEBUI_PORT=9500\n").unwrap();
        // The process env for this key must be unset for the test to mean
        // anything.
        std::env::remove_var("TELETON_WEBUI_PORT");
        let config = AgentConfig::load(dir.path()).unwrap();
        assert_eq!(config.webui.port, 9500);
    }

    #[test]
    fn privileged_port_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "webui:\n  port: 80\n");
        assert!(matches!(
            AgentConfig::load(dir.path()),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn bad_base_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "base_url: not a url\n");
        assert!(matches!(
            AgentConfig::load(dir.path()),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn bad_iteration_cap_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "max_agentic_iterations: 0\n");
        assert!(matches!(
            AgentConfig::load(dir.path()),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("::1"));
        assert!(is_loopback_host("localhost"));
        assert!(!is_loopback_host("0.0.0.0"));
    }
}
