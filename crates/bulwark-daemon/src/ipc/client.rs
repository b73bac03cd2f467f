//! IPC client implementation

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::UnixStream;

use bulwark_core::{
    read_frame, write_frame, CommandResponse, ProtocolError, Request, MAX_MESSAGE_SIZE,
    UNKNOWN_REQUEST_ID,
};

/// Transport-level failures talking to the daemon
///
/// A daemon that answers with an error response is not a `ClientError`;
/// that arrives as an ordinary [`CommandResponse`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running (no listener at {})", .0.display())]
    DaemonNotRunning(PathBuf),

    #[error("permission denied connecting to {} (is this user in the socket's group?)", .0.display())]
    PermissionDenied(PathBuf),

    #[error("failed to connect to {}: {}", .path.display(), .source)]
    Connection { path: PathBuf, source: io::Error },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Map a failed `connect` onto the error the caller should see
pub fn classify_connect_error(path: &Path, error: io::Error) -> ClientError {
    match error.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
            ClientError::DaemonNotRunning(path.to_path_buf())
        }
        io::ErrorKind::PermissionDenied => ClientError::PermissionDenied(path.to_path_buf()),
        _ => ClientError::Connection {
            path: path.to_path_buf(),
            source: error,
        },
    }
}

/// IPC client for front-ends
///
/// Stateless: every call opens a fresh connection, so one client can be
/// shared freely between tasks.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    max_message_bytes: usize,
}

impl IpcClient {
    /// Create a new IPC client
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_message_bytes: MAX_MESSAGE_SIZE,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and wait for its response
    pub async fn call(&self, request: &Request) -> Result<CommandResponse, ClientError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| classify_connect_error(&self.socket_path, e))?;

        let (reader, mut writer) = stream.into_split();
        write_frame(&mut writer, request).await?;

        let mut reader = BufReader::new(reader);
        let response: CommandResponse = read_frame(&mut reader, self.max_message_bytes).await?;

        if response.request_id != request.request_id() && response.request_id != UNKNOWN_REQUEST_ID {
            return Err(ClientError::Protocol(ProtocolError::Malformed(format!(
                "response for {} does not match request {}",
                response.request_id,
                request.request_id()
            ))));
        }

        Ok(response)
    }

    /// Check if daemon is running
    pub async fn ping(&self) -> bool {
        matches!(self.call(&Request::ping()).await, Ok(r) if r.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_connect_error() {
        let path = Path::new("/run/bulwark/rootd.sock");

        assert!(matches!(
            classify_connect_error(path, io::Error::from(io::ErrorKind::NotFound)),
            ClientError::DaemonNotRunning(_)
        ));
        assert!(matches!(
            classify_connect_error(path, io::Error::from(io::ErrorKind::ConnectionRefused)),
            ClientError::DaemonNotRunning(_)
        ));
        assert!(matches!(
            classify_connect_error(path, io::Error::from(io::ErrorKind::PermissionDenied)),
            ClientError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_connect_error(path, io::Error::from(io::ErrorKind::TimedOut)),
            ClientError::Connection { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_socket_is_daemon_not_running() {
        let dir = TempDir::new().unwrap();
        let client = IpcClient::new(dir.path().join("absent.sock"));

        let err = client.call(&Request::ping()).await.unwrap_err();
        assert!(matches!(err, ClientError::DaemonNotRunning(_)));
        assert!(!client.ping().await);
    }

    #[tokio::test]
    async fn test_closed_without_reply_is_protocol_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mute.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let err = IpcClient::new(&path).call(&Request::ping()).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_) | ClientError::Io(_)));
    }
}
