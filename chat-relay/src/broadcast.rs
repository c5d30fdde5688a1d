use bytes::Bytes;
use futures_util::future::join_all;
use tracing::debug;

use crate::{connection::ConnectionId, registry::Registry};

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients that accepted the message.
    pub delivered: usize,
    /// Recipients whose send failed and that were removed from the registry.
    pub dropped: Vec<ConnectionId>,
}

/// Hands `message` to every registered connection except `sender`.
///
/// Membership is copied out first, so sends never run under the registry
/// lock. Sends to different recipients proceed concurrently and this returns
/// once all of them have settled. A failed recipient is removed and the rest
/// of the fan-out carries on. Empty messages are forwarded like any other.
pub async fn deliver(registry: &Registry, sender: ConnectionId, message: &Bytes) -> DeliveryReport {
    let recipients: Vec<_> = registry
        .snapshot()
        .into_iter()
        .filter(|conn| conn.id() != sender)
        .collect();

    let outcomes = join_all(recipients.iter().map(|conn| async move {
        let outcome = conn.send(message).await;
        (conn.id(), outcome)
    }))
    .await;

    let mut report = DeliveryReport::default();
    for (id, outcome) in outcomes {
        match outcome {
            Ok(()) => report.delivered += 1,
            Err(error) => {
                debug!(conn = %id, %sender, %error, "dropping unreachable recipient");
                registry.remove(id);
                report.dropped.push(id);
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::{
        io::{DuplexStream, ReadHalf},
        time::timeout,
    };

    use super::*;
    use crate::{
        codec::{Framing, MessageReader},
        config::RelayConfig,
        connection::Connection,
    };

    struct Peer {
        id: ConnectionId,
        inbox: MessageReader<DuplexStream>,
        _relay_side: ReadHalf<DuplexStream>,
    }

    fn join(registry: &Registry, id: u64) -> Peer {
        let (relay_side, client_side) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(relay_side);
        let id = ConnectionId::new(id);
        registry
            .add(Arc::new(Connection::new(id, write, &RelayConfig::default())))
            .expect("add");
        Peer {
            id,
            inbox: MessageReader::new(client_side, Framing::Lines, 1024),
            _relay_side: read,
        }
    }

    async fn next(peer: &mut Peer) -> Bytes {
        timeout(Duration::from_secs(1), peer.inbox.next_message())
            .await
            .expect("message within a second")
            .expect("read")
            .expect("stream open")
    }

    async fn assert_silent(peer: &mut Peer) {
        let waited = timeout(Duration::from_millis(50), peer.inbox.next_message()).await;
        assert!(waited.is_err(), "peer {} received an unexpected message", peer.id);
    }

    #[tokio::test]
    async fn fans_out_to_everyone_but_the_sender() {
        let registry = Registry::new();
        let mut c1 = join(&registry, 1);
        let mut c2 = join(&registry, 2);
        let mut c3 = join(&registry, 3);

        let report = deliver(&registry, c1.id, &Bytes::from_static(b"hi")).await;

        assert_eq!(report.delivered, 2);
        assert!(report.dropped.is_empty());
        assert_eq!(next(&mut c2).await, Bytes::from_static(b"hi"));
        assert_eq!(next(&mut c3).await, Bytes::from_static(b"hi"));
        assert_silent(&mut c1).await;
    }

    #[tokio::test]
    async fn failed_recipient_is_removed_without_aborting_the_broadcast() {
        let registry = Registry::new();
        let mut c1 = join(&registry, 1);
        let c2 = join(&registry, 2);
        let mut c3 = join(&registry, 3);

        // Simulated broken pipe: c2's client end goes away.
        let c2_id = c2.id;
        drop(c2);

        let report = deliver(&registry, c1.id, &Bytes::from_static(b"hi")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, vec![c2_id]);
        assert!(!registry.contains(c2_id));
        assert_eq!(next(&mut c3).await, Bytes::from_static(b"hi"));

        let report = deliver(&registry, c3.id, &Bytes::from_static(b"back")).await;
        assert_eq!(report.delivered, 1);
        assert!(report.dropped.is_empty());
        assert_eq!(next(&mut c1).await, Bytes::from_static(b"back"));
        assert_silent(&mut c3).await;
    }

    #[tokio::test]
    async fn empty_message_is_forwarded() {
        let registry = Registry::new();
        let c1 = join(&registry, 1);
        let mut c2 = join(&registry, 2);

        let report = deliver(&registry, c1.id, &Bytes::new()).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(next(&mut c2).await, Bytes::new());
    }

    #[tokio::test]
    async fn lone_sender_reaches_nobody() {
        let registry = Registry::new();
        let c1 = join(&registry, 1);

        let report = deliver(&registry, c1.id, &Bytes::from_static(b"echo?")).await;

        assert_eq!(report, DeliveryReport::default());
        assert_eq!(registry.len(), 1);
    }
}
