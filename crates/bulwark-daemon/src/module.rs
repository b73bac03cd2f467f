//! The capability module contract
//!
//! A module is a named unit exposing a fixed set of actions. The registry
//! only ever talks to modules through [`CapabilityModule`], so new modules
//! plug in without touching dispatch.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use bulwark_core::{ActionDescriptor, ModuleDescriptor, Parameters};

/// Result type alias for module operations
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;

/// Errors a module reports back to the caller
///
/// The `Display` text is what ends up in the response `message`.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The external tool could not be started
    #[error("{program} is not available: {reason}")]
    ToolUnavailable { program: String, reason: String },

    /// The external tool ran and reported failure
    #[error("{program} failed: {message}")]
    ToolFailed { program: String, message: String },

    #[error("{program} timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },

    /// Output from the tool that could not be interpreted
    #[error("{0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModuleError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ModuleError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// A pluggable unit of privileged functionality
#[async_trait]
pub trait CapabilityModule: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str;

    /// Actions this module accepts; must not change after initialization
    fn capabilities(&self) -> Vec<ActionDescriptor>;

    /// Prepare the module; a failure keeps it out of the registry
    async fn initialize(&mut self) -> ModuleResult<()>;

    /// Release resources; best effort
    async fn shutdown(&self) {}

    /// Run one action
    async fn execute(&self, action: &str, parameters: &Parameters) -> ModuleResult<Value>;

    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            name: self.name().to_string(),
            version: self.version().to_string(),
            description: self.description().to_string(),
            capabilities: self.capabilities(),
        }
    }
}

/// Fetch a non-empty string parameter
pub fn required_str<'a>(parameters: &'a Parameters, name: &str) -> ModuleResult<&'a str> {
    match parameters.get(name) {
        None | Some(Value::Null) => Err(ModuleError::MissingParameter(name.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ModuleError::MissingParameter(name.to_string()))
        }
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(ModuleError::invalid(
            name,
            format!("expected string, got {}", json_kind(other)),
        )),
    }
}

/// Fetch a boolean parameter, accepting `"true"`/`"false"` strings
pub fn optional_bool(parameters: &Parameters, name: &str, default: bool) -> ModuleResult<bool> {
    match parameters.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(ModuleError::invalid(name, format!("expected boolean, got {s:?}"))),
        },
        Some(other) => Err(ModuleError::invalid(
            name,
            format!("expected boolean, got {}", json_kind(other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_required_str() {
        let p = params(json!({"zone": "public", "blank": "  ", "n": 3}));
        assert_eq!(required_str(&p, "zone").unwrap(), "public");
        assert!(matches!(
            required_str(&p, "missing"),
            Err(ModuleError::MissingParameter(_))
        ));
        assert!(matches!(
            required_str(&p, "blank"),
            Err(ModuleError::MissingParameter(_))
        ));
        assert!(matches!(
            required_str(&p, "n"),
            Err(ModuleError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_optional_bool() {
        let p = params(json!({"a": true, "b": "false", "c": "maybe", "d": 1}));
        assert!(optional_bool(&p, "a", false).unwrap());
        assert!(!optional_bool(&p, "b", true).unwrap());
        assert!(optional_bool(&p, "absent", true).unwrap());
        assert!(optional_bool(&p, "c", false).is_err());
        assert!(optional_bool(&p, "d", false).is_err());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ModuleError::UnsupportedAction("reboot".into()).to_string(),
            "unsupported action: reboot"
        );
        assert_eq!(
            ModuleError::MissingParameter("zone".into()).to_string(),
            "missing required parameter: zone"
        );
    }
}
