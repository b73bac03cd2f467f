//! IPC over the local Unix socket
//!
//! The server side lives in the daemon; the client is what every front-end
//! (CLI, agent bridge) uses to reach it.

mod client;
mod server;
mod unix;

// Public API
pub use client::{classify_connect_error, ClientError, IpcClient};
pub use server::{handle_connection, ConnectionLimits, IpcServer};
pub use unix::UnixIpcTransport;
