//! The connection registry: which transport client belongs to which
//! player, and the outbound handle for each. Owned by the engine task,
//! so no locking here; connection tasks only hold the sending half of
//! their own outbound channel.

use protocol::{PlayerName, ServerFrame};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Transport-level client identity, handed out in connection order.
pub type ClientId = u64;

/// One connected client.
pub struct ClientHandle {
    /// The outbound queue drained by the connection's writer task.
    pub outbound: mpsc::Sender<ServerFrame>,
    /// Set once the client joined as a player.
    pub player: Option<PlayerName>,
}

/// All live connections.
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientHandle>,
}

impl ClientRegistry {
    pub fn insert(&mut self, id: ClientId, outbound: mpsc::Sender<ServerFrame>) {
        self.clients.insert(id, ClientHandle { outbound, player: None });
    }

    /// Removes a client, returning the player it was bound to.
    pub fn remove(&mut self, id: ClientId) -> Option<PlayerName> {
        self.clients.remove(&id).and_then(|handle| handle.player)
    }

    /// Binds a client to a player. If another live client already held
    /// the player, that binding is dropped and its id returned so the
    /// caller can say goodbye.
    pub fn bind_player(&mut self, id: ClientId, player: &PlayerName) -> Option<ClientId> {
        let previous = self
            .clients
            .iter()
            .find(|(other, handle)| **other != id && handle.player.as_ref() == Some(player))
            .map(|(other, _)| *other);
        if let Some(previous) = previous
            && let Some(handle) = self.clients.get_mut(&previous)
        {
            handle.player = None;
        }
        if let Some(handle) = self.clients.get_mut(&id) {
            handle.player = Some(player.clone());
        }
        previous
    }

    pub fn player_of(&self, id: ClientId) -> Option<&PlayerName> {
        self.clients.get(&id).and_then(|handle| handle.player.as_ref())
    }

    /// Sends one frame to one client. A full queue drops the frame and
    /// logs; the per-second timer will paper over short stalls.
    pub fn send_to_client(&self, id: ClientId, frame: ServerFrame) {
        let Some(handle) = self.clients.get(&id) else { return };
        if let Err(e) = handle.outbound.try_send(frame) {
            tracing::warn!(client = id, error = %e, "Dropping outbound frame.");
        }
    }

    pub fn send_to_player(&self, player: &str, frame: ServerFrame) {
        if let Some((id, _)) = self
            .clients
            .iter()
            .find(|(_, handle)| handle.player.as_deref() == Some(player))
        {
            self.send_to_client(*id, frame);
        }
    }

    pub fn is_player_connected(&self, player: &str) -> bool {
        self.clients
            .values()
            .any(|handle| handle.player.as_deref() == Some(player))
    }

    /// Sends a frame to every client bound to a player.
    pub fn broadcast(&self, frame: &ServerFrame) {
        for (id, handle) in &self.clients {
            if handle.player.is_some() {
                self.send_to_client(*id, frame.clone());
            }
        }
    }

    /// All players currently bound to a live connection.
    pub fn connected_players(&self) -> Vec<PlayerName> {
        let mut players: Vec<PlayerName> = self
            .clients
            .values()
            .filter_map(|handle| handle.player.clone())
            .collect();
        players.sort();
        players
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> ServerFrame {
        ServerFrame::Info { text: "hi".into() }
    }

    #[tokio::test]
    async fn second_connection_for_a_player_replaces_the_first() {
        let mut registry = ClientRegistry::default();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.insert(1, tx_a);
        registry.insert(2, tx_b);

        assert_eq!(registry.bind_player(1, &"Alice".to_string()), None);
        let displaced = registry.bind_player(2, &"Alice".to_string());
        assert_eq!(displaced, Some(1));
        assert_eq!(registry.player_of(1), None);
        assert_eq!(registry.player_of(2), Some(&"Alice".to_string()));

        registry.send_to_player("Alice", frame());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_skips_unbound_clients() {
        let mut registry = ClientRegistry::default();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.insert(1, tx_a);
        registry.insert(2, tx_b);
        registry.bind_player(1, &"Alice".to_string());

        registry.broadcast(&frame());
        assert!(rx_a.try_recv().is_ok());
        // Client 2 never joined, spectators get nothing.
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn removal_reports_the_bound_player() {
        let mut registry = ClientRegistry::default();
        let (tx, _rx) = mpsc::channel(4);
        registry.insert(1, tx);
        registry.bind_player(1, &"Alice".to_string());
        assert_eq!(registry.remove(1), Some("Alice".to_string()));
        assert!(!registry.is_player_connected("Alice"));
    }
}
