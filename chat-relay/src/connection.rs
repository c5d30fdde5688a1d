use std::{fmt, net::SocketAddr, time::Duration};

use bytes::Bytes;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, watch},
    time::timeout,
};
use tracing::debug;

use crate::{codec::Framing, config::RelayConfig, error::WriteError};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Identity of one accepted session. Allocated once, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The outbound side of one participant.
///
/// The registry owns the membership of a `Connection`; the session that reads
/// from the peer keeps a handle only to identify itself and to close the
/// transport on exit. Writes are serialised per connection so that frames
/// from concurrent broadcasts never interleave on the wire.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    framing: Framing,
    write_timeout: Option<Duration>,
    writer: Mutex<Option<BoxedWriter>>,
    retired: watch::Sender<bool>,
}

impl Connection {
    pub fn new<W>(id: ConnectionId, writer: W, config: &RelayConfig) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (retired, _) = watch::channel(false);
        let writer: BoxedWriter = Box::new(writer);
        Self {
            id,
            peer: None,
            framing: config.framing,
            write_timeout: config.write_timeout,
            writer: Mutex::new(Some(writer)),
            retired,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// `false` once the connection has left the registry or been closed.
    pub fn is_live(&self) -> bool {
        !*self.retired.borrow()
    }

    /// Marks the connection as no longer eligible for delivery and wakes its
    /// session. Returns `true` only for the call that flipped the flag.
    pub fn retire(&self) -> bool {
        !self.retired.send_replace(true)
    }

    /// Resolves once [`retire`](Self::retire) has been called.
    pub async fn retired(&self) {
        let mut rx = self.retired.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|retired| *retired).await;
    }

    /// Writes one framed message to the peer.
    pub async fn send(&self, message: &Bytes) -> Result<(), WriteError> {
        if !self.is_live() {
            return Err(WriteError::Closed);
        }

        let frame = self.framing.encode(message);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(WriteError::Closed)?;

        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        match self.write_timeout {
            Some(limit) => timeout(limit, write)
                .await
                .map_err(|_| WriteError::Timeout(limit))??,
            None => write.await?,
        }
        Ok(())
    }

    /// Retires the connection and shuts down its write half.
    ///
    /// Safe to call more than once; only the first call touches the transport.
    pub async fn close(&self) {
        self.retire();
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(error) = writer.shutdown().await {
                debug!(conn = %self.id, ?error, "failed to shut down transport cleanly");
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("live", &self.is_live())
            .finish()
    }
}
