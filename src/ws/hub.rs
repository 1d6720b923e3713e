//! Connection registry and fan-out
//!
//! The hub task is the only owner of the live session set. Register,
//! unregister and broadcast all arrive on one queue and are applied in order,
//! so the set never needs a lock and a broadcast always sees a consistent
//! snapshot of who is connected.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound queue of one session
pub type SessionSender = mpsc::Sender<Bytes>;

enum HubCommand {
    Register { id: Uuid, outbound: SessionSender },
    Unregister { id: Uuid },
    Broadcast { payload: Bytes },
    Count { reply: oneshot::Sender<usize> },
}

/// Cloneable handle used to talk to the hub task
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Add a session's outbound queue to the live set
    pub fn register(&self, id: Uuid, outbound: SessionSender) {
        self.send(HubCommand::Register { id, outbound });
    }

    /// Remove a session. Dropping its queue ends the session's send duty.
    pub fn unregister(&self, id: Uuid) {
        self.send(HubCommand::Unregister { id });
    }

    /// Queue `payload` for every registered session. Never blocks.
    pub fn broadcast(&self, payload: Bytes) {
        self.send(HubCommand::Broadcast { payload });
    }

    /// Number of live sessions once every earlier command has been applied
    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Count { reply });
        rx.await.unwrap_or(0)
    }

    fn send(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            warn!("Hub task has stopped, dropping command");
        }
    }
}

/// The hub task state
pub struct Hub {
    commands: mpsc::UnboundedReceiver<HubCommand>,
    sessions: HashMap<Uuid, SessionSender>,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            commands: rx,
            sessions: HashMap::new(),
        };
        (hub, HubHandle { commands: tx })
    }

    /// Process commands until every handle is dropped
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register { id, outbound } => {
                    self.sessions.insert(id, outbound);
                    debug!(session_id = %id, connections = self.sessions.len(), "Session registered");
                }
                HubCommand::Unregister { id } => {
                    if self.sessions.remove(&id).is_some() {
                        debug!(session_id = %id, connections = self.sessions.len(), "Session unregistered");
                    }
                }
                HubCommand::Broadcast { payload } => self.fan_out(payload),
                HubCommand::Count { reply } => {
                    let _ = reply.send(self.sessions.len());
                }
            }
        }

        info!("Hub stopped");
    }

    /// Best-effort delivery; sessions that are full or gone are dropped
    fn fan_out(&mut self, payload: Bytes) {
        self.sessions.retain(|id, outbound| match outbound.try_send(payload.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %id, "Outbound queue full, dropping session");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session_id = %id, "Session gone, dropping");
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_hub() -> HubHandle {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());
        handle
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_session() {
        let hub = spawn_hub();
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        hub.register(Uuid::new_v4(), a_tx);
        hub.register(Uuid::new_v4(), b_tx);

        hub.broadcast(Bytes::from_static(b"hello"));

        assert_eq!(a_rx.recv().await, Some(Bytes::from_static(b"hello")));
        assert_eq!(b_rx.recv().await, Some(Bytes::from_static(b"hello")));
        assert_eq!(hub.connection_count().await, 2);
    }

    #[tokio::test]
    async fn unregistered_session_gets_nothing_and_its_queue_closes() {
        let hub = spawn_hub();
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);
        hub.register(id, tx);
        hub.unregister(id);
        hub.broadcast(Bytes::from_static(b"late"));

        assert_eq!(rx.recv().await, None);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn full_session_is_dropped_without_affecting_others() {
        let hub = spawn_hub();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        hub.register(Uuid::new_v4(), slow_tx);
        hub.register(Uuid::new_v4(), fast_tx);

        hub.broadcast(Bytes::from_static(b"1"));
        hub.broadcast(Bytes::from_static(b"2"));

        assert_eq!(fast_rx.recv().await, Some(Bytes::from_static(b"1")));
        assert_eq!(fast_rx.recv().await, Some(Bytes::from_static(b"2")));
        assert_eq!(slow_rx.recv().await, Some(Bytes::from_static(b"1")));
        assert_eq!(slow_rx.recv().await, None);
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn closed_session_is_pruned_on_broadcast() {
        let hub = spawn_hub();
        let (tx, rx) = mpsc::channel(8);
        hub.register(Uuid::new_v4(), tx);
        drop(rx);

        hub.broadcast(Bytes::from_static(b"x"));
        assert_eq!(hub.connection_count().await, 0);
    }
}
