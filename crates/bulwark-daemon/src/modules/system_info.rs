//! Read-only host facts
//!
//! Everything comes from procfs and `os-release` under a configurable root,
//! so tests can point the module at a fabricated tree.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

use bulwark_core::{ActionDescriptor, Parameters};

use crate::module::{CapabilityModule, ModuleError, ModuleResult};

pub struct SystemInfoModule {
    root: PathBuf,
}

impl SystemInfoModule {
    pub const NAME: &'static str = "system-info";

    pub fn new() -> Self {
        Self::with_root("/")
    }

    /// Read host files relative to `root` instead of `/`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_trimmed(&self, relative: &str) -> ModuleResult<String> {
        let path = self.root.join(relative);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ModuleError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        Ok(content.trim().to_string())
    }

    async fn hostname(&self) -> ModuleResult<String> {
        self.read_trimmed("proc/sys/kernel/hostname").await
    }

    async fn kernel_release(&self) -> ModuleResult<String> {
        self.read_trimmed("proc/sys/kernel/osrelease").await
    }

    async fn uptime_seconds(&self) -> ModuleResult<u64> {
        let raw = self.read_trimmed("proc/uptime").await?;
        parse_uptime(&raw)
            .ok_or_else(|| ModuleError::Internal(format!("unrecognised /proc/uptime: {raw:?}")))
    }

    /// `/etc/os-release`, falling back to `/usr/lib/os-release`
    async fn os_release(&self) -> HashMap<String, String> {
        for candidate in ["etc/os-release", "usr/lib/os-release"] {
            if let Ok(content) = tokio::fs::read_to_string(self.root.join(candidate)).await {
                return parse_os_release(&content);
            }
        }
        debug!("No os-release found under {:?}", self.root);
        HashMap::new()
    }

    async fn os_info(&self) -> ModuleResult<Value> {
        let system = self
            .read_trimmed("proc/sys/kernel/ostype")
            .await
            .unwrap_or_else(|_| "Linux".to_string());
        let version = self
            .read_trimmed("proc/sys/kernel/version")
            .await
            .unwrap_or_default();

        Ok(json!({
            "system": system,
            "release": self.kernel_release().await?,
            "version": version,
            "machine": std::env::consts::ARCH,
        }))
    }

    async fn distribution(&self) -> Value {
        let release = self.os_release().await;
        let field = |key: &str| {
            release
                .get(key)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string())
        };

        json!({
            "name": field("NAME"),
            "version": field("VERSION"),
            "id": field("ID"),
            "pretty_name": field("PRETTY_NAME"),
        })
    }

    async fn get_info(&self) -> ModuleResult<Value> {
        let uptime = self.uptime_seconds().await.unwrap_or(0);
        Ok(json!({
            "hostname": self.hostname().await?,
            "os": self.os_info().await?,
            "kernel": self.kernel_release().await?,
            "uptime_seconds": uptime,
            "distribution": self.distribution().await,
            "daemon_version": env!("CARGO_PKG_VERSION"),
        }))
    }

    async fn get_os_info(&self) -> ModuleResult<Value> {
        let mut info = match self.os_info().await? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        info.insert("distribution".to_string(), self.distribution().await);
        Ok(Value::Object(info))
    }

    async fn get_uptime(&self) -> ModuleResult<Value> {
        let secs = self.uptime_seconds().await?;
        let days = secs / 86_400;
        let hours = (secs % 86_400) / 3_600;
        let minutes = (secs % 3_600) / 60;

        Ok(json!({
            "uptime_seconds": secs,
            "uptime_days": days,
            "uptime_hours": hours,
            "uptime_minutes": minutes,
            "uptime_formatted": format!("{days}d {hours}h {minutes}m"),
        }))
    }
}

impl Default for SystemInfoModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityModule for SystemInfoModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Provides basic system information (hostname, OS, kernel, uptime)"
    }

    fn capabilities(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor::new("get_info", "Get comprehensive system information"),
            ActionDescriptor::new("get_hostname", "Get system hostname"),
            ActionDescriptor::new("get_os_info", "Get operating system information"),
            ActionDescriptor::new("get_kernel_version", "Get kernel version"),
            ActionDescriptor::new("get_uptime", "Get system uptime"),
        ]
    }

    async fn initialize(&mut self) -> ModuleResult<()> {
        info!("System info module initialized (root {:?})", self.root);
        Ok(())
    }

    async fn shutdown(&self) {
        info!("System info module shutting down");
    }

    async fn execute(&self, action: &str, _parameters: &Parameters) -> ModuleResult<Value> {
        match action {
            "get_info" => self.get_info().await,
            "get_hostname" => Ok(json!({ "hostname": self.hostname().await? })),
            "get_os_info" => self.get_os_info().await,
            "get_kernel_version" => Ok(json!({ "kernel_version": self.kernel_release().await? })),
            "get_uptime" => self.get_uptime().await,
            other => Err(ModuleError::UnsupportedAction(other.to_string())),
        }
    }
}

/// First field of `/proc/uptime`, truncated to whole seconds
fn parse_uptime(raw: &str) -> Option<u64> {
    let first = raw.split_whitespace().next()?;
    let secs: f64 = first.parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(secs as u64)
    } else {
        None
    }
}

/// Parse `KEY=value` lines, stripping one level of quotes
fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim().to_string(), unquoted.to_string())
        })
        .collect()
}
