//! Agent configuration
//!
//! The file is loose JSON so one format covers every mode. Before use it is
//! narrowed into an [`AgentSession`], which only exists when the fields the
//! chosen mode needs are present.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bulwark_core::DEFAULT_SOCKET_PATH;

use crate::error::{AgentError, Result};

/// Default location of the agent configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/bulwark/agent.json";

/// How the agent receives work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Poll the management server for jobs
    Pull,
    /// Accept jobs over HTTP
    Push,
    /// Jobs arrive as `bulwark` invocations over SSH
    Ssh,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Pull => write!(f, "pull"),
            Mode::Push => write!(f, "push"),
            Mode::Ssh => write!(f, "ssh"),
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub mode: Mode,

    /// Daemon socket path
    pub socket_path: PathBuf,

    /// Management server base URL (pull mode)
    pub server_url: Option<String>,

    /// Identity issued by the management server (pull mode)
    pub agent_id: Option<String>,

    /// Shared secret: sent on check-in, required on push requests
    pub api_key: Option<String>,

    pub poll_interval_secs: u64,

    /// Ceiling for retry backoff after failed check-ins
    pub max_backoff_secs: u64,

    pub http_timeout_secs: u64,

    /// Push-mode listen address
    pub listen_addr: SocketAddr,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Pull,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            server_url: None,
            agent_id: None,
            api_key: None,
            poll_interval_secs: 30,
            max_backoff_secs: 300,
            http_timeout_secs: 10,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
        }
    }
}

/// Settings for pull mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSettings {
    pub server_url: String,
    pub agent_id: String,
    pub api_key: String,
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    pub http_timeout: Duration,
}

impl PullSettings {
    pub fn checkin_url(&self) -> String {
        format!("{}/agents/api/checkin/", self.server_url.trim_end_matches('/'))
    }
}

/// Settings for push mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSettings {
    pub listen_addr: SocketAddr,
    pub api_key: String,
}

/// Validated, mode-specific view of the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSession {
    Pull(PullSettings),
    Push(PushSettings),
    Ssh,
}

impl AgentSession {
    pub fn mode(&self) -> Mode {
        match self {
            AgentSession::Pull(_) => Mode::Pull,
            AgentSession::Push(_) => Mode::Push,
            AgentSession::Ssh => Mode::Ssh,
        }
    }
}

impl AgentConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Narrow the file contents to what the configured mode needs
    pub fn session(&self) -> Result<AgentSession> {
        match self.mode {
            Mode::Pull => {
                let server_url = required(&self.server_url, "server_url", "pull")?;
                if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
                    return Err(AgentError::Config(format!(
                        "server_url must be an http(s) URL, got {server_url:?}"
                    )));
                }
                if self.poll_interval_secs == 0 {
                    return Err(AgentError::Config(
                        "poll_interval_secs must be positive".to_string(),
                    ));
                }

                Ok(AgentSession::Pull(PullSettings {
                    server_url,
                    agent_id: required(&self.agent_id, "agent_id", "pull")?,
                    api_key: required(&self.api_key, "api_key", "pull")?,
                    poll_interval: Duration::from_secs(self.poll_interval_secs),
                    max_backoff: Duration::from_secs(
                        self.max_backoff_secs.max(self.poll_interval_secs),
                    ),
                    http_timeout: Duration::from_secs(self.http_timeout_secs.max(1)),
                }))
            }
            Mode::Push => Ok(AgentSession::Push(PushSettings {
                listen_addr: self.listen_addr,
                api_key: required(&self.api_key, "api_key", "push")?,
            })),
            Mode::Ssh => Ok(AgentSession::Ssh),
        }
    }
}

fn required(value: &Option<String>, field: &str, mode: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AgentError::Config(format!(
            "{field} is required for {mode} mode"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pull_config() -> AgentConfig {
        AgentConfig {
            server_url: Some("https://mgmt.example.com/".into()),
            agent_id: Some("agent-1".into()),
            api_key: Some("secret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_pull_session() {
        let AgentSession::Pull(settings) = pull_config().session().unwrap() else {
            panic!("expected pull session");
        };
        assert_eq!(
            settings.checkin_url(),
            "https://mgmt.example.com/agents/api/checkin/"
        );
        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.max_backoff, Duration::from_secs(300));
    }

    #[test]
    fn test_pull_requires_credentials() {
        let config = AgentConfig {
            api_key: Some("  ".into()),
            ..pull_config()
        };
        let err = config.session().unwrap_err();
        assert!(err.to_string().contains("api_key is required for pull mode"));

        let config = AgentConfig {
            server_url: Some("mgmt.example.com".into()),
            ..pull_config()
        };
        assert!(config.session().is_err());
    }

    #[test]
    fn test_push_requires_api_key() {
        let config = AgentConfig {
            mode: Mode::Push,
            ..Default::default()
        };
        assert!(config.session().is_err());

        let config = AgentConfig {
            mode: Mode::Push,
            api_key: Some("k".into()),
            ..Default::default()
        };
        assert_eq!(config.session().unwrap().mode(), Mode::Push);
    }

    #[test]
    fn test_ssh_needs_nothing() {
        let config = AgentConfig {
            mode: Mode::Ssh,
            ..Default::default()
        };
        assert_eq!(config.session().unwrap(), AgentSession::Ssh);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, r#"{"mode":"push","api_key":"k","listen_addr":"127.0.0.1:9000"}"#)
            .unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.mode, Mode::Push);
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.poll_interval_secs, 30);

        config.save(&path).unwrap();
        assert_eq!(AgentConfig::load(&path).unwrap().listen_addr, config.listen_addr);
    }
}
