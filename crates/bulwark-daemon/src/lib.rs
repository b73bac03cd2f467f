//! Bulwark Daemon - Privileged executor for capability modules
//!
//! This crate provides:
//! - The `CapabilityModule` contract and the builtin modules
//! - A registry with capability-checked, time-bounded dispatch
//! - The Unix socket server run by `bulwark-rootd`
//! - The client used by unprivileged front-ends

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ipc;
pub mod module;
pub mod modules;
pub mod registry;
pub mod tool;

pub use config::DaemonConfig;
pub use dispatch::Dispatcher;
pub use error::{DaemonError, Result};
pub use ipc::{ClientError, IpcClient, IpcServer};
pub use module::{CapabilityModule, ModuleError, ModuleResult};
pub use modules::{load_builtin, register_initialized};
pub use registry::{ModuleRegistry, RegistryError};
