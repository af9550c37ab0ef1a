//! Broker link over a Unix domain socket speaking NDJSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rearlink_core::protocol::{BrokerMessage, ClientMessage, encode_line, parse_broker_line};

use super::replies::ReplySlots;
use super::{BrokerConnector, BrokerLink};
use crate::error::LinkError;

/// Connects to a broker listening on a Unix socket.
#[derive(Debug, Clone)]
pub struct UnixBrokerConnector {
    socket_path: PathBuf,
}

impl UnixBrokerConnector {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[async_trait]
impl BrokerConnector for UnixBrokerConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerLink>, LinkError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            debug!(error = ?e, path = %self.socket_path.display(), "broker connect error details");
            LinkError::Unavailable(format!("{}: {e}", self.socket_path.display()))
        })?;
        info!(path = %self.socket_path.display(), "Connected to broker socket");
        Ok(Arc::new(UnixBrokerLink::new(stream)))
    }
}

/// An open NDJSON link to the broker.
///
/// A background task reads broker lines and routes replies to waiting
/// callers; writes are serialized through a mutex.
pub struct UnixBrokerLink {
    writer: Mutex<OwnedWriteHalf>,
    replies: ReplySlots,
    closed_tx: Arc<watch::Sender<bool>>,
    reader: JoinHandle<()>,
}

impl UnixBrokerLink {
    pub fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let replies = ReplySlots::new();
        let (closed_tx, _) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);

        let reader = tokio::spawn(read_loop(
            read_half,
            replies.clone(),
            Arc::clone(&closed_tx),
        ));

        Self {
            writer: Mutex::new(write_half),
            replies,
            closed_tx,
            reader,
        }
    }

    async fn write(&self, message: &ClientMessage) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        let line = encode_line(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl BrokerLink for UnixBrokerLink {
    async fn send(&self, message: ClientMessage) -> Result<(), LinkError> {
        self.write(&message).await
    }

    async fn call(&self, request: ClientMessage) -> Result<BrokerMessage, LinkError> {
        let request_id = request
            .request_id()
            .ok_or_else(|| LinkError::Protocol("message expects no reply".into()))?
            .to_string();

        let (_slot, rx) = self.replies.register(request_id);
        self.write(&request).await?;
        rx.await.map_err(|_| LinkError::Closed)
    }

    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn close(&self) {
        self.reader.abort();
        self.replies.clear();
        self.closed_tx.send_replace(true);
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!(error = %e, "Broker socket shutdown failed");
        }
    }
}

impl Drop for UnixBrokerLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    replies: ReplySlots,
    closed_tx: Arc<watch::Sender<bool>>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Broker closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Broker read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_broker_line(&line) {
            Ok(BrokerMessage::Goodbye { reason }) => {
                info!(reason = %reason, "Broker ended the session");
                break;
            }
            Ok(
                failure @ BrokerMessage::Error {
                    request_id: None, ..
                },
            ) => {
                warn!(?failure, "Broker reported a session-level error");
                let notified = replies.broadcast(&failure);
                debug!(notified, "Failed calls waiting on broker");
                break;
            }
            Ok(BrokerMessage::Unknown { msg_type, .. }) => {
                warn!(msg_type = %msg_type, "Unknown broker message type");
            }
            Ok(msg) => {
                let Some(request_id) = msg.request_id().map(str::to_owned) else {
                    warn!(?msg, "Unsolicited broker message");
                    continue;
                };
                if !replies.complete(&request_id, msg) {
                    debug!(request_id = %request_id, "Dropping reply with no waiter");
                }
            }
            Err(e) => warn!(error = %e, "Malformed broker line"),
        }
    }

    let abandoned = replies.clear();
    if abandoned > 0 {
        debug!(abandoned, "Failing calls still waiting on broker");
    }
    closed_tx.send_replace(true);
}
