use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{io::AsyncRead, select, time::timeout};
use tracing::{debug, info, trace};

use crate::{
    broadcast::deliver,
    codec::MessageReader,
    connection::{Connection, ConnectionId},
    error::ReadError,
    registry::Registry,
    shutdown::Shutdown,
};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Reading,
    Delivering,
    Closing,
    Closed,
}

/// Why a session left the read loop.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed its end of the stream.
    EndOfStream,
    /// Reading failed, timed out or hit an oversize frame.
    ReadFailed(ReadError),
    /// A broadcast could not reach this peer and removed it.
    Evicted,
    Shutdown,
}

enum Inbound {
    Message(Bytes),
    Closed(CloseReason),
}

/// Per-connection loop: read one message, fan it out, repeat.
///
/// Each session alternates strictly between reading and delivering, which is
/// what keeps one sender's messages in order at every recipient.
pub struct Session<R> {
    conn: Arc<Connection>,
    reader: MessageReader<R>,
    registry: Arc<Registry>,
    read_timeout: Option<Duration>,
    shutdown: Shutdown,
    state: SessionState,
    // Deregisters even if the session is dropped before it finishes.
    _registration: Deregister,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin,
{
    /// Builds the handler for a connection that is already registered.
    pub fn new(
        conn: Arc<Connection>,
        reader: MessageReader<R>,
        registry: Arc<Registry>,
        read_timeout: Option<Duration>,
        shutdown: Shutdown,
    ) -> Self {
        let _registration = Deregister {
            registry: Arc::clone(&registry),
            id: conn.id(),
        };
        Self {
            conn,
            reader,
            registry,
            read_timeout,
            shutdown,
            state: SessionState::Connected,
            _registration,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session to [`SessionState::Closed`] and reports why it ended.
    pub async fn run(mut self) -> CloseReason {
        let reason = loop {
            self.enter(SessionState::Reading);
            let message = match self.next_inbound().await {
                Inbound::Message(message) => message,
                Inbound::Closed(reason) => break reason,
            };

            self.enter(SessionState::Delivering);
            // A recipient that never reads would otherwise hold this session
            // (and that recipient's writer lock) past shutdown.
            let report = select! {
                biased;
                _ = self.shutdown.recv() => break CloseReason::Shutdown,
                report = deliver(&self.registry, self.conn.id(), &message) => report,
            };
            trace!(
                conn = %self.conn.id(),
                delivered = report.delivered,
                dropped = report.dropped.len(),
                "message relayed"
            );
        };

        self.enter(SessionState::Closing);
        self.registry.remove(self.conn.id());
        self.conn.close().await;
        self.enter(SessionState::Closed);

        match &reason {
            CloseReason::ReadFailed(error) => {
                debug!(conn = %self.conn.id(), %error, "read failed");
            }
            reason => trace!(conn = %self.conn.id(), ?reason, "read loop finished"),
        }
        info!(conn = %self.conn.id(), peer = ?self.conn.peer(), "client disconnected");

        reason
    }

    async fn next_inbound(&mut self) -> Inbound {
        let Self {
            conn,
            reader,
            read_timeout,
            shutdown,
            ..
        } = self;

        select! {
            biased;
            _ = shutdown.recv() => Inbound::Closed(CloseReason::Shutdown),
            _ = conn.retired() => Inbound::Closed(CloseReason::Evicted),
            read = read_next(reader, *read_timeout) => match read {
                Ok(Some(message)) => Inbound::Message(message),
                Ok(None) => Inbound::Closed(CloseReason::EndOfStream),
                Err(error) => Inbound::Closed(CloseReason::ReadFailed(error)),
            },
        }
    }

    fn enter(&mut self, next: SessionState) {
        trace!(conn = %self.conn.id(), from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

async fn read_next<R>(
    reader: &mut MessageReader<R>,
    read_timeout: Option<Duration>,
) -> Result<Option<Bytes>, ReadError>
where
    R: AsyncRead + Unpin,
{
    match read_timeout {
        Some(limit) => timeout(limit, reader.next_message())
            .await
            .map_err(|_| ReadError::Idle(limit))?,
        None => reader.next_message().await,
    }
}

struct Deregister {
    registry: Arc<Registry>,
    id: ConnectionId,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
        task::JoinHandle,
    };

    use super::*;
    use crate::{
        codec::Framing,
        config::RelayConfig,
        shutdown::{self, ShutdownTrigger},
    };

    struct Harness {
        registry: Arc<Registry>,
        id: ConnectionId,
        client: DuplexStream,
        task: JoinHandle<CloseReason>,
        trigger: ShutdownTrigger,
    }

    fn start(read_timeout: Option<Duration>) -> Harness {
        let registry = Arc::new(Registry::new());
        let (trigger, signal) = shutdown::channel();
        let (relay_side, client) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(relay_side);

        let id = ConnectionId::new(1);
        let conn = Arc::new(Connection::new(id, write, &RelayConfig::default()));
        registry.add(Arc::clone(&conn)).expect("add");

        let session = Session::new(
            conn,
            MessageReader::new(read, Framing::Lines, 1024),
            Arc::clone(&registry),
            read_timeout,
            signal,
        );
        assert_eq!(session.state(), SessionState::Connected);

        Harness {
            registry,
            id,
            client,
            task: tokio::spawn(session.run()),
            trigger,
        }
    }

    async fn finish(task: JoinHandle<CloseReason>) -> CloseReason {
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session should end")
            .expect("join")
    }

    #[tokio::test]
    async fn end_of_stream_deregisters() {
        let mut harness = start(None);
        harness.client.write_all(b"hello\n").await.expect("write");
        harness.client.shutdown().await.expect("shutdown");

        let reason = finish(harness.task).await;
        assert!(matches!(reason, CloseReason::EndOfStream));
        assert!(!harness.registry.contains(harness.id));
    }

    #[tokio::test]
    async fn eviction_ends_the_read_loop() {
        let harness = start(None);
        harness.registry.remove(harness.id);

        let reason = finish(harness.task).await;
        assert!(matches!(reason, CloseReason::Evicted));
    }

    #[tokio::test]
    async fn shutdown_signal_closes_the_session() {
        let mut harness = start(None);
        harness.trigger.trigger();

        let reason = finish(harness.task).await;
        assert!(matches!(reason, CloseReason::Shutdown));

        let mut rest = Vec::new();
        harness
            .client
            .read_to_end(&mut rest)
            .await
            .expect("read");
        assert!(rest.is_empty());
        assert!(harness.registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_stalled_delivery() {
        let mut harness = start(None);
        let (stalled, _never_read) = tokio::io::duplex(8);
        let recipient = Arc::new(Connection::new(
            ConnectionId::new(2),
            stalled,
            &RelayConfig::default(),
        ));
        harness.registry.add(Arc::clone(&recipient)).expect("add");

        harness.client.write_all(&[b'x'; 512]).await.expect("write");
        harness.client.write_all(b"\n").await.expect("write");
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.trigger.trigger();

        let reason = finish(harness.task).await;
        assert!(matches!(reason, CloseReason::Shutdown));
        // The abandoned write must have released the recipient's writer.
        timeout(Duration::from_secs(1), recipient.close())
            .await
            .expect("writer lock released");
    }

    #[tokio::test]
    async fn idle_peer_times_out() {
        let harness = start(Some(Duration::from_millis(30)));

        let reason = finish(harness.task).await;
        assert!(matches!(
            reason,
            CloseReason::ReadFailed(ReadError::Idle(_))
        ));
        assert!(harness.registry.is_empty());
    }

    #[tokio::test]
    async fn aborted_session_still_deregisters() {
        let harness = start(None);
        harness.task.abort();
        let _ = harness.task.await;

        assert!(!harness.registry.contains(harness.id));
    }
}
