//! Module and action descriptors published for discovery and CLI help

use serde::{Deserialize, Serialize};

/// Documentation for one parameter of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub required: bool,
}

/// One action a module declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Declare a required parameter
    pub fn required(mut self, name: &str, kind: &str, description: &str) -> Self {
        self.parameters.push(ParamSpec {
            name: name.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            required: true,
        });
        self
    }

    /// Declare an optional parameter
    pub fn optional(mut self, name: &str, kind: &str, description: &str) -> Self {
        self.parameters.push(ParamSpec {
            name: name.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            required: false,
        });
        self
    }
}

/// Identity and action set of a loaded module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub capabilities: Vec<ActionDescriptor>,
}

impl ModuleDescriptor {
    /// Whether `action` is one of the declared capabilities
    pub fn declares(&self, action: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == action)
    }
}
