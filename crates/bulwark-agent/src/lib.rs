//! Bulwark Agent - Unprivileged front-end for bulwark-rootd
//!
//! Every mode funnels work through one [`Bridge`] into the daemon socket:
//! - pull: check in with the management server and run what it hands out
//! - push: accept authenticated jobs over HTTP
//! - ssh: jobs arrive as `bulwark` CLI invocations, the agent stays idle

pub mod bridge;
pub mod config;
pub mod error;
pub mod pull;
pub mod push;

pub use bridge::{Bridge, DaemonLink};
pub use config::{AgentConfig, AgentSession, Mode, PullSettings, PushSettings};
pub use error::{AgentError, Result};
pub use pull::{HttpJobServer, JobServer, PullAgent};
