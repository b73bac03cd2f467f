//! firewalld management through `firewall-cmd`
//!
//! Every user-supplied value is validated before it reaches the tool, and
//! values are passed as separate argv entries. Mutations hold an internal
//! lock so two callers never interleave `firewall-cmd` writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use bulwark_core::{ActionDescriptor, Parameters};

use crate::module::{optional_bool, required_str, CapabilityModule, ModuleError, ModuleResult};
use crate::tool::{run_tool, ToolOutput};

/// Longest accepted zone or service name
const MAX_NAME_LEN: usize = 64;

/// Longest accepted rich rule
const MAX_RULE_LEN: usize = 1024;

const PROTOCOLS: &[&str] = &["tcp", "udp", "sctp", "dccp"];

/// How the firewall module reaches `firewall-cmd`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Program to execute
    pub program: PathBuf,

    /// Arguments placed before every action's own arguments
    pub base_args: Vec<String>,

    /// Per-invocation deadline (seconds)
    pub timeout_secs: u64,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("firewall-cmd"),
            base_args: Vec::new(),
            timeout_secs: 30,
        }
    }
}

pub struct FirewallModule {
    config: FirewallConfig,
    write_lock: Mutex<()>,
}

impl FirewallModule {
    pub const NAME: &'static str = "firewall";

    pub fn new(config: FirewallConfig) -> Self {
        Self {
            config,
            write_lock: Mutex::new(()),
        }
    }

    fn program_name(&self) -> String {
        self.config.program.display().to_string()
    }

    async fn run(&self, args: Vec<String>) -> ModuleResult<ToolOutput> {
        let mut argv = self.config.base_args.clone();
        argv.extend(args);
        run_tool(
            &self.config.program,
            &argv,
            Duration::from_secs(self.config.timeout_secs),
        )
        .await
    }

    /// Run and require a zero exit status; returns trimmed stdout
    async fn run_checked(&self, args: Vec<String>) -> ModuleResult<String> {
        let output = self.run(args).await?;
        if !output.success() {
            return Err(ModuleError::ToolFailed {
                program: self.program_name(),
                message: output.diagnostic(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Run a configuration change under the write lock
    async fn mutate(&self, args: Vec<String>, permanent: bool) -> ModuleResult<String> {
        let mut args = args;
        if permanent {
            args.push("--permanent".to_string());
        }
        let _guard = self.write_lock.lock().await;
        self.run_checked(args).await
    }

    async fn get_status(&self) -> ModuleResult<Value> {
        let output = self.run(vec!["--state".to_string()]).await?;
        let state = if output.stdout.trim().is_empty() {
            output.stderr.trim().to_string()
        } else {
            output.stdout.trim().to_string()
        };
        Ok(json!({ "running": output.success(), "state": state }))
    }

    async fn get_zone(&self, parameters: &Parameters) -> ModuleResult<Value> {
        let zone = zone_param(parameters)?;
        let raw = self
            .run_checked(vec![format!("--zone={zone}"), "--list-all".to_string()])
            .await?;

        let mut parsed = parse_zone_listing(&raw);
        if let Value::Object(map) = &mut parsed {
            map.entry("name").or_insert_with(|| json!(zone));
            map.insert("raw".to_string(), json!(raw));
        }
        Ok(parsed)
    }

    async fn zone_member(
        &self,
        parameters: &Parameters,
        flag: &str,
        key: &str,
        validate: fn(&str, &str) -> ModuleResult<()>,
    ) -> ModuleResult<Value> {
        let zone = zone_param(parameters)?;
        let value = required_str(parameters, key)?;
        validate(key, value)?;
        let permanent = optional_bool(parameters, "permanent", false)?;

        self.mutate(
            vec![format!("--zone={zone}"), format!("--{flag}={value}")],
            permanent,
        )
        .await?;

        info!(
            "firewall: {} {}={} in zone {} (permanent={})",
            flag, key, value, zone, permanent
        );
        let mut data = Map::new();
        data.insert("zone".to_string(), json!(zone));
        data.insert(key.to_string(), json!(value));
        data.insert("permanent".to_string(), json!(permanent));
        Ok(Value::Object(data))
    }
}

#[async_trait]
impl CapabilityModule for FirewallModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Manages firewalld zones, services, ports, and rules"
    }

    fn capabilities(&self) -> Vec<ActionDescriptor> {
        let zone = |a: ActionDescriptor| a.required("zone", "string", "Zone name");
        let permanent = |a: ActionDescriptor| {
            a.optional("permanent", "boolean", "Apply to the permanent configuration")
        };

        vec![
            ActionDescriptor::new("get_status", "Get firewalld running state"),
            ActionDescriptor::new("get_version", "Get firewalld version"),
            ActionDescriptor::new("list_zones", "List all zones"),
            ActionDescriptor::new("get_active_zones", "List active zones with their bindings"),
            zone(ActionDescriptor::new("get_zone", "Get zone configuration")),
            ActionDescriptor::new("get_default_zone", "Get default zone"),
            ActionDescriptor::new("list_services", "List available services"),
            zone(ActionDescriptor::new("set_default_zone", "Set default zone")),
            permanent(
                zone(ActionDescriptor::new("add_service", "Add service to zone"))
                    .required("service", "string", "Service name"),
            ),
            permanent(
                zone(ActionDescriptor::new("remove_service", "Remove service from zone"))
                    .required("service", "string", "Service name"),
            ),
            permanent(
                zone(ActionDescriptor::new("add_port", "Add port to zone"))
                    .required("port", "string", "Port/protocol (e.g., 8080/tcp)"),
            ),
            permanent(
                zone(ActionDescriptor::new("remove_port", "Remove port from zone"))
                    .required("port", "string", "Port/protocol (e.g., 8080/tcp)"),
            ),
            permanent(
                zone(ActionDescriptor::new("add_rich_rule", "Add rich rule to zone"))
                    .required("rule", "string", "Rich rule"),
            ),
            permanent(
                zone(ActionDescriptor::new("remove_rich_rule", "Remove rich rule from zone"))
                    .required("rule", "string", "Rich rule"),
            ),
            ActionDescriptor::new("reload", "Reload firewalld configuration"),
            ActionDescriptor::new(
                "runtime_to_permanent",
                "Copy the runtime configuration to the permanent one",
            ),
        ]
    }

    async fn initialize(&mut self) -> ModuleResult<()> {
        let version = self.run_checked(vec!["--version".to_string()]).await?;
        info!("Firewall module initialized (firewalld {})", version);

        match self.run(vec!["--state".to_string()]).await {
            Ok(output) if output.success() => {}
            Ok(output) => warn!("firewalld is not running: {}", output.diagnostic()),
            Err(e) => warn!("Could not query firewalld state: {}", e),
        }
        Ok(())
    }

    async fn shutdown(&self) {
        // Wait for any in-flight mutation before reporting done
        let _guard = self.write_lock.lock().await;
        info!("Firewall module shutting down");
    }

    async fn execute(&self, action: &str, parameters: &Parameters) -> ModuleResult<Value> {
        match action {
            "get_status" => self.get_status().await,
            "get_version" => {
                let version = self.run_checked(vec!["--version".to_string()]).await?;
                Ok(json!({ "version": version }))
            }
            "list_zones" => {
                let out = self.run_checked(vec!["--get-zones".to_string()]).await?;
                Ok(json!({ "zones": split_words(&out) }))
            }
            "get_active_zones" => {
                let out = self.run_checked(vec!["--get-active-zones".to_string()]).await?;
                Ok(json!({ "zones": parse_active_zones(&out) }))
            }
            "get_zone" => self.get_zone(parameters).await,
            "get_default_zone" => {
                let zone = self
                    .run_checked(vec!["--get-default-zone".to_string()])
                    .await?;
                Ok(json!({ "default_zone": zone }))
            }
            "list_services" => {
                let out = self.run_checked(vec!["--get-services".to_string()]).await?;
                Ok(json!({ "services": split_words(&out) }))
            }
            "set_default_zone" => {
                let zone = zone_param(parameters)?;
                // Already persistent; firewall-cmd rejects --permanent here
                self.mutate(vec![format!("--set-default-zone={zone}")], false)
                    .await?;
                info!("firewall: default zone set to {}", zone);
                Ok(json!({ "default_zone": zone }))
            }
            "add_service" => {
                self.zone_member(parameters, "add-service", "service", validate_name)
                    .await
            }
            "remove_service" => {
                self.zone_member(parameters, "remove-service", "service", validate_name)
                    .await
            }
            "add_port" => {
                self.zone_member(parameters, "add-port", "port", validate_port_spec)
                    .await
            }
            "remove_port" => {
                self.zone_member(parameters, "remove-port", "port", validate_port_spec)
                    .await
            }
            "add_rich_rule" => {
                self.zone_member(parameters, "add-rich-rule", "rule", validate_rich_rule)
                    .await
            }
            "remove_rich_rule" => {
                self.zone_member(parameters, "remove-rich-rule", "rule", validate_rich_rule)
                    .await
            }
            "reload" => {
                self.mutate(vec!["--reload".to_string()], false).await?;
                Ok(json!({ "reloaded": true }))
            }
            "runtime_to_permanent" => {
                self.mutate(vec!["--runtime-to-permanent".to_string()], false)
                    .await?;
                Ok(json!({ "saved": true }))
            }
            other => Err(ModuleError::UnsupportedAction(other.to_string())),
        }
    }
}

fn zone_param(parameters: &Parameters) -> ModuleResult<&str> {
    let zone = required_str(parameters, "zone")?;
    validate_name("zone", zone)?;
    Ok(zone)
}

fn split_words(output: &str) -> Vec<String> {
    output.split_whitespace().map(str::to_string).collect()
}

/// Zone and service names: ASCII word characters, never starting with `-`
fn validate_name(param: &str, value: &str) -> ModuleResult<()> {
    if value.len() > MAX_NAME_LEN {
        return Err(ModuleError::invalid(
            param,
            format!("longer than {MAX_NAME_LEN} characters"),
        ));
    }
    if value.starts_with('-') {
        return Err(ModuleError::invalid(param, "must not start with '-'"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ModuleError::invalid(param, "contains invalid characters"));
    }
    Ok(())
}

/// `PORT/PROTO` or `LOW-HIGH/PROTO`
fn validate_port_spec(param: &str, value: &str) -> ModuleResult<()> {
    let (ports, proto) = value
        .split_once('/')
        .ok_or_else(|| ModuleError::invalid(param, "expected PORT/PROTOCOL, e.g. 8080/tcp"))?;

    if !PROTOCOLS.contains(&proto) {
        return Err(ModuleError::invalid(
            param,
            format!("unknown protocol {proto:?}"),
        ));
    }

    let parse = |s: &str| -> ModuleResult<u16> {
        match s.parse::<u16>() {
            Ok(p) if p > 0 && s.chars().all(|c| c.is_ascii_digit()) => Ok(p),
            _ => Err(ModuleError::invalid(
                param,
                format!("port {s:?} must be between 1 and 65535"),
            )),
        }
    };

    match ports.split_once('-') {
        Some((low, high)) => {
            let (low, high) = (parse(low)?, parse(high)?);
            if low > high {
                return Err(ModuleError::invalid(
                    param,
                    format!("range start {low} is greater than end {high}"),
                ));
            }
        }
        None => {
            parse(ports)?;
        }
    }
    Ok(())
}

/// Rich rules are a single printable line starting with `rule`
fn validate_rich_rule(param: &str, value: &str) -> ModuleResult<()> {
    if value.len() > MAX_RULE_LEN {
        return Err(ModuleError::invalid(
            param,
            format!("longer than {MAX_RULE_LEN} characters"),
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(ModuleError::invalid(param, "contains control characters"));
    }
    if !value.trim_start().starts_with("rule") {
        return Err(ModuleError::invalid(param, "must start with 'rule'"));
    }
    Ok(())
}

const LIST_KEYS: &[&str] = &[
    "interfaces",
    "sources",
    "services",
    "ports",
    "protocols",
    "forward_ports",
    "source_ports",
    "icmp_blocks",
];

/// Parse `firewall-cmd --zone=Z --list-all` output into JSON
fn parse_zone_listing(output: &str) -> Value {
    let mut zone = Map::new();
    let mut rich_rules = Vec::new();
    let mut in_rich_rules = false;

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        // Header: "public (active)" at column zero
        if !line.starts_with(char::is_whitespace) && !zone.contains_key("name") {
            let mut parts = line.split_whitespace();
            if let Some(name) = parts.next() {
                zone.insert("name".to_string(), json!(name));
                zone.insert("active".to_string(), json!(line.contains("(active)")));
                zone.insert("default".to_string(), json!(line.contains("(default)")));
            }
            continue;
        }

        let trimmed = line.trim();
        if in_rich_rules && trimmed.starts_with("rule") {
            rich_rules.push(json!(trimmed));
            continue;
        }

        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let key = key.trim().replace([' ', '-'], "_");
        let value = value.trim();
        in_rich_rules = key == "rich_rules";

        if in_rich_rules {
            if !value.is_empty() {
                rich_rules.push(json!(value));
            }
        } else if LIST_KEYS.contains(&key.as_str()) {
            zone.insert(key, json!(split_words(value)));
        } else {
            let parsed = match value {
                "yes" => json!(true),
                "no" => json!(false),
                other => json!(other),
            };
            zone.insert(key, parsed);
        }
    }

    zone.insert("rich_rules".to_string(), Value::Array(rich_rules));
    Value::Object(zone)
}

/// Parse `--get-active-zones`: zone names at column zero, bindings indented
fn parse_active_zones(output: &str) -> Value {
    let mut zones = Map::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            let name = line.split_whitespace().next().unwrap_or_default().to_string();
            zones.insert(name.clone(), Value::Object(Map::new()));
            current = Some(name);
            continue;
        }

        let (Some(name), Some((key, value))) = (&current, line.trim().split_once(':')) else {
            continue;
        };
        if let Some(Value::Object(bindings)) = zones.get_mut(name) {
            bindings.insert(key.trim().to_string(), json!(split_words(value)));
        }
    }

    Value::Object(zones)
}
