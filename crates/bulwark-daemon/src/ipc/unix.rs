//! Unix domain socket IPC transport

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

use crate::error::{DaemonError, Result};

/// Unix domain socket server transport
pub struct UnixIpcTransport {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl UnixIpcTransport {
    /// Bind `path`, then restrict it to `mode` and hand it to `group`
    pub fn bind(path: &Path, mode: u32, group: Option<&str>) -> Result<Self> {
        // Remove stale socket from a previous run
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path).map_err(|e| {
            DaemonError::Ipc(format!("Failed to bind socket {}: {}", path.display(), e))
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;

        if let Some(group) = group {
            match lookup_group(group)? {
                Some(gid) => {
                    std::os::unix::fs::chown(path, None, Some(gid))?;
                    info!("Socket {} owned by group {} ({})", path.display(), group, gid);
                }
                None => warn!(
                    "Group {:?} does not exist; socket {} keeps the daemon's group",
                    group,
                    path.display()
                ),
            }
        }

        Ok(Self {
            listener,
            socket_path: path.to_path_buf(),
        })
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| DaemonError::Ipc(format!("Accept failed: {}", e)))?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    pub fn cleanup(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        Ok(())
    }
}

fn lookup_group(name: &str) -> Result<Option<u32>> {
    nix::unistd::Group::from_name(name)
        .map(|group| group.map(|g| g.gid.as_raw()))
        .map_err(|e| DaemonError::Ipc(format!("Failed to look up group {name:?}: {e}")))
}
