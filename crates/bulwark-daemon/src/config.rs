//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bulwark_core::{DEFAULT_SOCKET_PATH, MAX_MESSAGE_SIZE};

use crate::error::{DaemonError, Result};
use crate::modules::firewall::FirewallConfig;

/// Default location of the daemon configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/bulwark/rootd.json";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path for IPC
    pub socket_path: PathBuf,

    /// Group that owns the socket; members may connect
    pub socket_group: Option<String>,

    /// Octal permission string applied to the socket after bind
    pub socket_mode: String,

    /// Largest accepted request, newline excluded
    pub max_message_bytes: usize,

    /// Upper bound on a single module execution (seconds)
    pub command_timeout_secs: u64,

    /// Connections served concurrently before accept blocks
    pub max_connections: usize,

    /// How long a connection may take to deliver its request (seconds)
    pub read_timeout_secs: u64,

    /// Builtin modules to load, in registration order
    pub modules: Vec<String>,

    /// Settings for the firewall module
    pub firewall: FirewallConfig,

    /// Skip the root check (tests and local development only)
    pub dev_mode: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            socket_group: Some("bulwark".to_string()),
            socket_mode: "0660".to_string(),
            max_message_bytes: MAX_MESSAGE_SIZE,
            command_timeout_secs: 60,
            max_connections: 64,
            read_timeout_secs: 10,
            modules: vec!["system-info".to_string(), "firewall".to_string()],
            firewall: FirewallConfig::default(),
            dev_mode: false,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load the file at `path`, writing the defaults there first if it is missing
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }

        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        Ok((config, true))
    }

    /// Reject settings the daemon cannot safely run with
    pub fn validate(&self) -> Result<()> {
        self.mode_bits()?;

        if self.max_message_bytes == 0 {
            return Err(DaemonError::Config(
                "max_message_bytes must be positive".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(DaemonError::Config(
                "max_connections must be positive".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(DaemonError::Config(
                "command_timeout_secs must be positive".to_string(),
            ));
        }
        if self.read_timeout_secs == 0 {
            return Err(DaemonError::Config(
                "read_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed socket permission bits
    ///
    /// The socket grants root to its clients, so any bit for "other" is refused.
    pub fn mode_bits(&self) -> Result<u32> {
        let bits = u32::from_str_radix(self.socket_mode.trim_start_matches("0o"), 8)
            .map_err(|_| {
                DaemonError::Config(format!("invalid socket_mode {:?}", self.socket_mode))
            })?;

        if bits > 0o777 {
            return Err(DaemonError::Config(format!(
                "socket_mode {:?} out of range",
                self.socket_mode
            )));
        }
        if bits & 0o007 != 0 {
            return Err(DaemonError::Config(format!(
                "socket_mode {:?} must not grant access to other users",
                self.socket_mode
            )));
        }

        Ok(bits)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Create the socket's parent directory if it doesn't exist
    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/run/bulwark/rootd.sock"));
        assert_eq!(config.mode_bits().unwrap(), 0o660);
        assert_eq!(config.command_timeout(), Duration::from_secs(60));
        assert_eq!(config.read_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_message_bytes, 1024 * 1024);
        assert!(!config.dev_mode);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: DaemonConfig =
            serde_json::from_str(r#"{"socket_path":"/tmp/x.sock","dev_mode":true}"#).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/x.sock"));
        assert!(config.dev_mode);
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.modules, vec!["system-info", "firewall"]);
    }

    #[test]
    fn test_world_accessible_mode_rejected() {
        let config = DaemonConfig {
            socket_mode: "0666".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));

        let config = DaemonConfig {
            socket_mode: "rw-rw----".to_string(),
            ..Default::default()
        };
        assert!(config.mode_bits().is_err());

        let config = DaemonConfig {
            socket_mode: "0o600".to_string(),
            ..Default::default()
        };
        assert_eq!(config.mode_bits().unwrap(), 0o600);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = DaemonConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DaemonConfig {
            read_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_create() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc").join("rootd.json");

        let (config, created) = DaemonConfig::load_or_create(&path).unwrap();
        assert!(created);
        assert!(path.exists());

        let (reloaded, created) = DaemonConfig::load_or_create(&path).unwrap();
        assert!(!created);
        assert_eq!(reloaded.socket_mode, config.socket_mode);
        assert_eq!(reloaded.firewall.program, config.firewall.program);
    }
}
