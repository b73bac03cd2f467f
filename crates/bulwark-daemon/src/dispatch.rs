//! Request dispatch
//!
//! Turns one decoded [`Request`] into exactly one [`CommandResponse`]. Every
//! failure past decoding becomes an error response carrying the request id.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use bulwark_core::{CommandRequest, CommandResponse, Parameters, Request};

use crate::modules::system_info::SystemInfoModule;
use crate::registry::ModuleRegistry;

/// Routes requests to registered modules
pub struct Dispatcher {
    registry: Arc<ModuleRegistry>,
    command_timeout: Duration,
    started_at: Instant,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModuleRegistry>, command_timeout: Duration) -> Self {
        Self {
            registry,
            command_timeout,
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Handle a single request
    pub async fn handle(&self, request: Request) -> CommandResponse {
        debug!("Dispatching {} request {}", request.kind(), request.request_id());

        match request {
            Request::Ping { request_id } => CommandResponse::success(
                request_id,
                json!({
                    "pong": true,
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime_secs": self.started_at.elapsed().as_secs(),
                }),
            ),

            Request::ListModules { request_id } => CommandResponse::success(
                request_id,
                json!({ "modules": self.registry.names() }),
            ),

            Request::ModuleInfo { request_id, name } => match self.registry.descriptor(&name) {
                Ok(descriptor) => match serde_json::to_value(descriptor) {
                    Ok(data) => CommandResponse::success(request_id, data),
                    Err(e) => CommandResponse::failure(request_id, e.to_string()),
                },
                Err(e) => CommandResponse::failure(request_id, e.to_string()),
            },

            Request::SystemInfo { request_id } => {
                self.execute(CommandRequest {
                    request_id,
                    module: SystemInfoModule::NAME.to_string(),
                    action: "get_info".to_string(),
                    parameters: Parameters::new(),
                })
                .await
            }

            Request::ExecuteCommand(command) => self.execute(command).await,
        }
    }

    /// Run one command against its module
    pub async fn execute(&self, command: CommandRequest) -> CommandResponse {
        let CommandRequest {
            request_id,
            module: module_name,
            action,
            parameters,
        } = command;

        let module = match self.registry.resolve(&module_name) {
            Ok(module) => Arc::clone(module),
            Err(e) => {
                warn!("Request {}: {}", request_id, e);
                return CommandResponse::failure(request_id, e.to_string());
            }
        };

        let declared = self
            .registry
            .descriptor(&module_name)
            .map(|d| d.declares(&action))
            .unwrap_or(false);
        if !declared {
            warn!(
                "Request {}: {} does not declare action {}",
                request_id, module_name, action
            );
            return CommandResponse::failure(request_id, format!("unsupported action: {action}"));
        }

        info!(
            "Request {}: executing {}/{}",
            request_id, module_name, action
        );

        // A detached task isolates panics and lets a timed-out action finish on its own
        let task = {
            let action = action.clone();
            tokio::spawn(async move { module.execute(&action, &parameters).await })
        };

        match tokio::time::timeout(self.command_timeout, task).await {
            Ok(Ok(Ok(data))) => CommandResponse::success(request_id, data),
            Ok(Ok(Err(e))) => {
                warn!(
                    "Request {}: {}/{} failed: {}",
                    request_id, module_name, action, e
                );
                CommandResponse::failure(request_id, e.to_string())
            }
            Ok(Err(join_error)) => {
                error!(
                    "Request {}: {}/{} aborted: {}",
                    request_id, module_name, action, join_error
                );
                CommandResponse::failure(request_id, format!("module fault: {module_name}"))
            }
            Err(_) => {
                warn!(
                    "Request {}: {}/{} exceeded {}s",
                    request_id,
                    module_name,
                    action,
                    self.command_timeout.as_secs()
                );
                CommandResponse::failure(
                    request_id,
                    format!(
                        "command timed out after {}s",
                        self.command_timeout.as_secs()
                    ),
                )
            }
        }
    }
}
