use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::{JoinError, JoinSet},
    time::{sleep, timeout},
};
use tracing::{error, info, warn};

use crate::{
    codec::MessageReader,
    config::{AcceptPolicy, RelayConfig, ShutdownPolicy},
    connection::{Connection, ConnectionId},
    error::{AcceptError, RelayError},
    registry::Registry,
    session::{CloseReason, Session},
    shutdown::{self, Shutdown, ShutdownTrigger},
};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) doesn't spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long signalled sessions get to close before their tasks are aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Accepts participants and runs one session task per connection.
pub struct Relay {
    listener: TcpListener,
    config: RelayConfig,
    registry: Arc<Registry>,
    next_id: AtomicU64,
}

impl Relay {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            config,
            registry: Arc::new(Registry::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Binds `config.host:config.port` after validating the configuration.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: addr.clone(),
                source,
            })?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle on the live membership, mostly for introspection.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accepts until `shutdown` resolves, then applies the configured
    /// [`ShutdownPolicy`] to the sessions still running.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send,
    {
        let (trigger, signal) = shutdown::channel();
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        let outcome = loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break Ok(());
                }
                accepted = self.listener.accept() => {
                    if let Err(err) = self.handle_accept_result(accepted, &signal, &mut sessions).await {
                        break Err(err);
                    }
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    reap(joined);
                }
            }
        };

        let Relay {
            listener, config, ..
        } = self;
        drop(listener);
        finish_sessions(&config, sessions, trigger).await;

        outcome
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), RelayError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    async fn handle_accept_result(
        &self,
        result: std::io::Result<(TcpStream, SocketAddr)>,
        signal: &Shutdown,
        sessions: &mut JoinSet<CloseReason>,
    ) -> Result<(), RelayError> {
        match result {
            Ok((stream, peer)) => {
                self.admit(stream, peer, signal, sessions);
                Ok(())
            }
            Err(err) => {
                let err = AcceptError(err);
                warn!(error = %err, "accept failed");
                match self.config.accept_errors {
                    AcceptPolicy::Continue => {
                        sleep(ACCEPT_BACKOFF).await;
                        Ok(())
                    }
                    AcceptPolicy::Fatal => Err(err.into()),
                }
            }
        }
    }

    fn admit(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        signal: &Shutdown,
        sessions: &mut JoinSet<CloseReason>,
    ) {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reader, writer) = stream.into_split();
        let conn = Arc::new(Connection::new(id, writer, &self.config).with_peer(peer));

        if let Err(err) = self.registry.add(Arc::clone(&conn)) {
            error!(conn = %id, %peer, error = %err, "refusing connection");
            return;
        }
        info!(conn = %id, %peer, "client connected");

        let reader = MessageReader::new(reader, self.config.framing, self.config.message_limit());
        let session = Session::new(
            conn,
            reader,
            Arc::clone(&self.registry),
            self.config.read_timeout,
            signal.clone(),
        );
        sessions.spawn(session.run());
    }
}

fn reap(joined: Result<CloseReason, JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            error!(error = %err, "session task panicked");
        }
    }
}

async fn finish_sessions(
    config: &RelayConfig,
    mut sessions: JoinSet<CloseReason>,
    trigger: ShutdownTrigger,
) {
    if sessions.is_empty() {
        return;
    }

    match config.on_shutdown {
        ShutdownPolicy::Detach => {
            info!(live = sessions.len(), "leaving live sessions running");
            // The trigger stays unfired and alive until every session ends on
            // its own, so nothing asks them to stop.
            drain(&mut sessions).await;
            drop(trigger);
        }
        ShutdownPolicy::Drain => {
            info!(live = sessions.len(), grace = ?config.drain_timeout, "draining sessions");
            if timeout(config.drain_timeout, drain(&mut sessions)).await.is_err() {
                warn!(live = sessions.len(), "drain timed out; closing remaining sessions");
                close_all(&mut sessions, &trigger).await;
            }
        }
        ShutdownPolicy::Close => {
            info!(live = sessions.len(), "closing live sessions");
            close_all(&mut sessions, &trigger).await;
        }
    }
}

async fn close_all(sessions: &mut JoinSet<CloseReason>, trigger: &ShutdownTrigger) {
    trigger.trigger();
    if timeout(CLOSE_GRACE, drain(sessions)).await.is_err() {
        warn!(live = sessions.len(), "sessions ignored shutdown; aborting them");
        // Each aborted session deregisters itself when its task is dropped.
        sessions.abort_all();
        drain(sessions).await;
    }
}

async fn drain(sessions: &mut JoinSet<CloseReason>) {
    while let Some(joined) = sessions.join_next().await {
        reap(joined);
    }
}
