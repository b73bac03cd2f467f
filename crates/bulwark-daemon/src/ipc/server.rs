//! IPC server implementation

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use bulwark_core::{
    read_frame_bytes, skip_frame, write_frame, CommandResponse, ProtocolError, Request,
    UNKNOWN_REQUEST_ID,
};

use crate::config::DaemonConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::registry::ModuleRegistry;

use super::unix::UnixIpcTransport;

/// Per-connection bounds on what a client may send
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_message_bytes: usize,
    /// Deadline for the whole request to arrive
    pub read_timeout: Duration,
}

impl ConnectionLimits {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            max_message_bytes: config.max_message_bytes,
            read_timeout: config.read_timeout(),
        }
    }
}

/// IPC server
///
/// One request and one response per connection. Handlers run concurrently,
/// bounded by `max_connections`.
pub struct IpcServer {
    transport: UnixIpcTransport,
    dispatcher: Arc<Dispatcher>,
    limits: ConnectionLimits,
    max_connections: usize,
}

impl IpcServer {
    /// Bind the socket described by `config`
    pub fn bind(config: &DaemonConfig, registry: Arc<ModuleRegistry>) -> Result<Self> {
        let transport = UnixIpcTransport::bind(
            &config.socket_path,
            config.mode_bits()?,
            config.socket_group.as_deref(),
        )?;

        Ok(Self {
            transport,
            dispatcher: Arc::new(Dispatcher::new(registry, config.command_timeout())),
            limits: ConnectionLimits::from_config(config),
            max_connections: config.max_connections,
        })
    }

    pub fn socket_path(&self) -> &std::path::Path {
        self.transport.path()
    }

    /// Serve until `shutdown` resolves, then drain and clean up
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("IPC server listening on {:?}", self.transport.path());

        let permits = Arc::new(Semaphore::new(self.max_connections));
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            // Back-pressure: no accept until a handler slot is free
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let stream = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.transport.accept() => accepted,
            };

            match stream {
                Ok(stream) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let limits = self.limits;
                    handlers.spawn(async move {
                        if let Err(e) = handle_connection(stream, &dispatcher, &limits).await {
                            error!("Connection error: {}", e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => error!("{}", e),
            }

            // Reap finished handlers so the set doesn't grow unbounded
            while handlers.try_join_next().is_some() {}
        }

        info!(
            "Shutdown requested; waiting for {} in-flight connection(s)",
            handlers.len()
        );
        while let Some(result) = handlers.join_next().await {
            if let Err(e) = result {
                error!("Connection handler aborted: {}", e);
            }
        }

        self.dispatcher.registry().shutdown_all().await;
        self.transport.cleanup()?;
        info!("IPC server stopped");
        Ok(())
    }
}

/// Handle a single IPC connection
///
/// A client that does not deliver its request within `read_timeout` gets an
/// error response and is disconnected, releasing its connection slot.
pub async fn handle_connection<S>(
    stream: S,
    dispatcher: &Dispatcher,
    limits: &ConnectionLimits,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    let received = tokio::time::timeout(
        limits.read_timeout,
        read_request(&mut reader, limits.max_message_bytes),
    )
    .await;

    let received = match received {
        Ok(received) => received,
        Err(_) => {
            warn!(
                "No request within {}s, closing connection",
                limits.read_timeout.as_secs()
            );
            Err(ProtocolError::ReadTimeout {
                secs: limits.read_timeout.as_secs(),
            })
        }
    };

    let response = match received {
        Ok(bytes) => match decode_request(&bytes) {
            Ok(request) => dispatcher.handle(request).await,
            Err(response) => response,
        },
        Err(ProtocolError::UnexpectedEof) => {
            debug!("Client closed without sending a request");
            return Ok(());
        }
        Err(ProtocolError::Io(e)) => return Err(e.into()),
        Err(e) => {
            warn!("Rejected request: {}", e);
            CommandResponse::failure(UNKNOWN_REQUEST_ID, format!("protocol error: {e}"))
        }
    };

    write_frame(&mut writer, &response).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Read one frame; an oversized one is drained so the client can read the rejection
async fn read_request<R>(reader: &mut R, limit: usize) -> std::result::Result<Vec<u8>, ProtocolError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match read_frame_bytes(reader, limit).await {
        Err(ProtocolError::FrameTooLarge { limit }) => {
            let skipped = skip_frame(reader).await?;
            debug!("Discarded {} trailing bytes of oversized request", skipped);
            Err(ProtocolError::FrameTooLarge { limit })
        }
        other => other,
    }
}

/// Decode a request, or build the error response that answers it
///
/// When the JSON is well-formed but not a valid request, the error response
/// still carries the client's `request_id` if one can be found.
fn decode_request(bytes: &[u8]) -> std::result::Result<Request, CommandResponse> {
    serde_json::from_slice::<Request>(bytes).map_err(|e| {
        let request_id = serde_json::from_slice::<serde_json::Value>(bytes)
            .ok()
            .and_then(|v| v.get("request_id")?.as_str().map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_REQUEST_ID.to_string());

        warn!("Malformed request {}: {}", request_id, e);
        CommandResponse::failure(request_id, format!("protocol error: malformed message: {e}"))
    })
}
