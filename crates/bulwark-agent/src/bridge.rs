//! The one path from any front-end mode into the daemon

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use bulwark_core::{CommandResponse, Parameters, Request};
use bulwark_daemon::{ClientError, IpcClient};

/// Something that answers daemon requests
#[async_trait]
pub trait DaemonLink: Send + Sync {
    async fn call(&self, request: &Request) -> Result<CommandResponse, ClientError>;
}

#[async_trait]
impl DaemonLink for IpcClient {
    async fn call(&self, request: &Request) -> Result<CommandResponse, ClientError> {
        IpcClient::call(self, request).await
    }
}

/// Shared handle every mode dispatches through
#[derive(Clone)]
pub struct Bridge {
    daemon: Arc<dyn DaemonLink>,
}

impl Bridge {
    pub fn new(daemon: Arc<dyn DaemonLink>) -> Self {
        Self { daemon }
    }

    /// Bridge over the daemon socket at `socket_path`
    pub fn connect(socket_path: impl Into<std::path::PathBuf>) -> Self {
        Self::new(Arc::new(IpcClient::new(socket_path)))
    }

    /// Run one module action
    ///
    /// `Err` means the daemon was unreachable; a failing action is an
    /// `Ok` response with `success=false`.
    pub async fn dispatch_one(
        &self,
        module: &str,
        action: &str,
        parameters: Parameters,
    ) -> Result<CommandResponse, ClientError> {
        let request = Request::execute(module, action, parameters);
        debug!("Dispatching {}/{} as {}", module, action, request.request_id());

        let response = self.daemon.call(&request).await?;
        info!(
            "{}/{} -> {}",
            module,
            action,
            if response.is_success() { "ok" } else { "failed" }
        );
        Ok(response)
    }

    pub async fn request(&self, request: &Request) -> Result<CommandResponse, ClientError> {
        self.daemon.call(request).await
    }

    pub async fn ping(&self) -> bool {
        matches!(self.daemon.call(&Request::ping()).await, Ok(r) if r.is_success())
    }

    /// Names of the modules the daemon has loaded
    pub async fn module_names(&self) -> Result<Vec<String>, ClientError> {
        let response = self.daemon.call(&Request::list_modules()).await?;
        Ok(response
            .data()
            .and_then(|d| d.get("modules"))
            .and_then(|m| m.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}
