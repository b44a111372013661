//! Live-connection directory for the signaling relay

use crate::protocol::{PeerId, ServerMessage};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

/// Tracks currently-connected peers and their outbound channels.
///
/// Pure bookkeeping: register/unregister/lookup are each atomic under the
/// lock, so concurrent connects, disconnects and routes from unrelated
/// peers cannot corrupt or lose entries. Nothing beyond that is guaranteed;
/// routing is a single lookup-and-forward.
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<PeerId, mpsc::Sender<ServerMessage>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection and hand back its assigned id. Never
    /// fails; ids are never reused while another peer could reference them.
    pub async fn register(&self, tx: mpsc::Sender<ServerMessage>) -> PeerId {
        let mut peers = self.peers.write().await;
        loop {
            let id = PeerId::generate();
            if !peers.contains_key(&id) {
                peers.insert(id.clone(), tx);
                return id;
            }
        }
    }

    /// Remove a connection. Idempotent.
    pub async fn unregister(&self, id: &PeerId) {
        self.peers.write().await.remove(id);
    }

    /// All live peer ids except `id`. A snapshot of registry state at call
    /// time, in no particular order.
    pub async fn list_others(&self, id: &PeerId) -> Vec<PeerId> {
        self.peers
            .read()
            .await
            .keys()
            .filter(|other| *other != id)
            .cloned()
            .collect()
    }

    /// Outbound channel for a live peer, if any. The sender is cloned out
    /// so delivery happens outside the lock.
    pub async fn sender(&self, id: &PeerId) -> Option<mpsc::Sender<ServerMessage>> {
        self.peers.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
