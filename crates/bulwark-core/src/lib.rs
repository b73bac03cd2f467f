//! Bulwark Core - Shared protocol types for privileged command execution
//!
//! This crate provides the pieces every participant on the local socket
//! agrees on: the request/response envelopes, the newline-delimited framing
//! with its size bound, and the descriptors modules publish for discovery.

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod protocol;

pub use codec::{read_frame, read_frame_bytes, skip_frame, write_frame};
pub use descriptor::{ActionDescriptor, ModuleDescriptor, ParamSpec};
pub use error::{ProtocolError, Result};
pub use protocol::{
    new_request_id, CommandRequest, CommandResponse, Outcome, Parameters, Request,
    UNKNOWN_REQUEST_ID,
};

/// Default well-known path of the daemon socket
pub const DEFAULT_SOCKET_PATH: &str = "/run/bulwark/rootd.sock";

/// Upper bound on a single encoded message, newline excluded
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
