//! Request and response envelopes
//!
//! Every connection to the daemon carries exactly one [`Request`] followed by
//! exactly one [`CommandResponse`]. Both are JSON objects discriminated by a
//! `type` field and correlated by `request_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Action parameters as sent on the wire
pub type Parameters = serde_json::Map<String, Value>;

/// Request id used when a message could not be decoded far enough to read one
pub const UNKNOWN_REQUEST_ID: &str = "unknown";

/// Generate a fresh correlation token
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A request to run one action of one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub request_id: String,
    pub module: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl CommandRequest {
    /// Create a request with a freshly generated id
    pub fn new(module: impl Into<String>, action: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            request_id: new_request_id(),
            module: module.into(),
            action: action.into(),
            parameters,
        }
    }
}

/// Messages a caller may send to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Liveness check
    Ping { request_id: String },

    /// Names of all registered modules
    ListModules { request_id: String },

    /// Descriptor of one module
    ModuleInfo { request_id: String, name: String },

    /// Shortcut for `system-info/get_info`
    SystemInfo { request_id: String },

    /// Run a module action
    ExecuteCommand(CommandRequest),
}

impl Request {
    pub fn ping() -> Self {
        Request::Ping {
            request_id: new_request_id(),
        }
    }

    pub fn list_modules() -> Self {
        Request::ListModules {
            request_id: new_request_id(),
        }
    }

    pub fn module_info(name: impl Into<String>) -> Self {
        Request::ModuleInfo {
            request_id: new_request_id(),
            name: name.into(),
        }
    }

    pub fn system_info() -> Self {
        Request::SystemInfo {
            request_id: new_request_id(),
        }
    }

    pub fn execute(
        module: impl Into<String>,
        action: impl Into<String>,
        parameters: Parameters,
    ) -> Self {
        Request::ExecuteCommand(CommandRequest::new(module, action, parameters))
    }

    /// Correlation token of this request
    pub fn request_id(&self) -> &str {
        match self {
            Request::Ping { request_id }
            | Request::ListModules { request_id }
            | Request::ModuleInfo { request_id, .. }
            | Request::SystemInfo { request_id } => request_id,
            Request::ExecuteCommand(command) => &command.request_id,
        }
    }

    /// Short name of the message type, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Ping { .. } => "ping",
            Request::ListModules { .. } => "list_modules",
            Request::ModuleInfo { .. } => "module_info",
            Request::SystemInfo { .. } => "system_info",
            Request::ExecuteCommand(_) => "execute_command",
        }
    }
}

/// Result carried by a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Success { data: Value },
    Error { message: String },
}

/// The single response written back for a request
///
/// `data` is present exactly when the command succeeded and `error` exactly
/// when it failed; [`Outcome`] makes the two states unrepresentable together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub request_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl CommandResponse {
    /// Build a successful response stamped with the current time
    pub fn success(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: Outcome::Success { data },
            timestamp: Utc::now(),
        }
    }

    /// Build a failed response stamped with the current time
    pub fn failure(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: Outcome::Error {
                message: message.into(),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success { data } => Some(data),
            Outcome::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Error { message } => Some(message),
        }
    }

    /// Consume the response, yielding its data or its error message
    pub fn into_result(self) -> std::result::Result<Value, String> {
        match self.outcome {
            Outcome::Success { data } => Ok(data),
            Outcome::Error { message } => Err(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_request_wire_shape() {
        let mut params = Parameters::new();
        params.insert("zone".into(), json!("public"));
        let request = Request::ExecuteCommand(CommandRequest {
            request_id: "r-1".into(),
            module: "firewall".into(),
            action: "add_service".into(),
            parameters: params,
        });

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "execute_command",
                "request_id": "r-1",
                "module": "firewall",
                "action": "add_service",
                "parameters": {"zone": "public"}
            })
        );
    }

    #[test]
    fn test_parameters_default_to_empty() {
        let request: Request = serde_json::from_str(
            r#"{"type":"execute_command","request_id":"x","module":"system-info","action":"get_hostname"}"#,
        )
        .unwrap();

        match request {
            Request::ExecuteCommand(command) => assert!(command.parameters.is_empty()),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = serde_json::from_str::<Request>(r#"{"type":"format_disk","request_id":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_response_wire_shape() {
        let response = CommandResponse::failure("r-2", "module not found: selinux");
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["type"], "error");
        assert_eq!(value["request_id"], "r-2");
        assert_eq!(value["message"], "module not found: selinux");
        assert!(value.get("data").is_none());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_response_accessors() {
        let ok = CommandResponse::success("a", json!({"hostname": "host1"}));
        assert!(ok.is_success());
        assert_eq!(ok.data(), Some(&json!({"hostname": "host1"})));
        assert_eq!(ok.error(), None);

        let failed = CommandResponse::failure("b", "unsupported action: bogus_action");
        assert!(!failed.is_success());
        assert_eq!(failed.data(), None);
        assert_eq!(failed.error(), Some("unsupported action: bogus_action"));
        assert_eq!(
            failed.into_result(),
            Err("unsupported action: bogus_action".to_string())
        );
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = Request::ping();
        let b = Request::ping();
        assert_ne!(a.request_id(), b.request_id());
        assert_eq!(a.kind(), "ping");
    }
}
