//! Live match table and the connection → match index.

use crate::client_manager::ConnectionId;
use crate::error::ServerError;
use crate::game::{MatchId, PaddleCommand};
use log::debug;
use shared::Side;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Mailbox messages for a running match.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchCommand {
    Move { side: Side, command: PaddleCommand },
    /// `None` toggles.
    Pause { side: Side, paused: Option<bool> },
    PlayerLeft { side: Side },
}

#[derive(Debug, Clone)]
pub struct MatchHandle {
    pub id: MatchId,
    pub sender: mpsc::UnboundedSender<MatchCommand>,
    /// Human connections and the seat each one drives.
    pub connections: Vec<(ConnectionId, Side)>,
    /// Non-bot player ids seated in the match, local seats included.
    pub users: Vec<u64>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    matches: HashMap<MatchId, MatchHandle>,
    by_connection: HashMap<ConnectionId, (MatchId, Side)>,
    by_user: HashMap<u64, MatchId>,
}

pub type SharedRegistry = Arc<RwLock<SessionRegistry>>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: MatchHandle) -> Result<(), ServerError> {
        if self.matches.contains_key(&handle.id) {
            return Err(ServerError::DuplicateMatch(handle.id));
        }
        for (connection, side) in &handle.connections {
            // A connection seated on both sides (local play) routes as its first seat.
            self.by_connection
                .entry(*connection)
                .or_insert((handle.id, *side));
        }
        for user in &handle.users {
            self.by_user.insert(*user, handle.id);
        }
        self.matches.insert(handle.id, handle);
        Ok(())
    }

    /// Removes a match and its index entries. Returns `None` if it was
    /// already gone, so callers can tell the first removal apart.
    pub fn deregister(&mut self, id: MatchId) -> Option<MatchHandle> {
        let handle = self.matches.remove(&id)?;
        self.by_connection.retain(|_, (match_id, _)| *match_id != id);
        self.by_user.retain(|_, match_id| *match_id != id);
        Some(handle)
    }

    pub fn lookup(&self, id: MatchId) -> Option<&MatchHandle> {
        self.matches.get(&id)
    }

    pub fn match_for(&self, connection: ConnectionId) -> Option<(MatchId, Side)> {
        self.by_connection.get(&connection).copied()
    }

    /// The live match a player is seated in, whichever connection they use.
    pub fn match_for_user(&self, user_id: u64) -> Option<MatchId> {
        self.by_user.get(&user_id).copied()
    }

    /// Sends a command built from the connection's seat to its match.
    /// Returns false on a routing miss.
    pub fn route(
        &self,
        connection: ConnectionId,
        build: impl FnOnce(Side) -> MatchCommand,
    ) -> bool {
        let Some((id, side)) = self.match_for(connection) else {
            debug!("No match for {}", connection);
            return false;
        };
        let Some(handle) = self.matches.get(&id) else {
            return false;
        };
        if handle.sender.send(build(side)).is_err() {
            debug!("[match {}] mailbox closed", id);
            return false;
        }
        true
    }

    pub fn contains(&self, id: MatchId) -> bool {
        self.matches.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(
        id: MatchId,
        connections: Vec<(ConnectionId, Side)>,
    ) -> (MatchHandle, mpsc::UnboundedReceiver<MatchCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            MatchHandle {
                id,
                sender,
                connections,
                users: Vec::new(),
            },
            receiver,
        )
    }

    #[test]
    fn test_register_rejects_duplicate_id() {
        let mut registry = SessionRegistry::new();
        let (first, _rx1) = handle(7, vec![(ConnectionId(1), Side::Left)]);
        let (second, _rx2) = handle(7, vec![(ConnectionId(2), Side::Left)]);

        tokio_test::assert_ok!(registry.register(first));
        assert!(matches!(
            registry.register(second),
            Err(ServerError::DuplicateMatch(7))
        ));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.match_for(ConnectionId(2)), None);
    }

    #[test]
    fn test_route_uses_connection_seat() {
        let mut registry = SessionRegistry::new();
        let (h, mut rx) = handle(
            3,
            vec![(ConnectionId(1), Side::Left), (ConnectionId(2), Side::Right)],
        );
        registry.register(h).unwrap();

        assert!(registry.route(ConnectionId(2), |side| MatchCommand::PlayerLeft { side }));
        assert_eq!(
            rx.try_recv().unwrap(),
            MatchCommand::PlayerLeft { side: Side::Right }
        );
        assert!(!registry.route(ConnectionId(9), |side| MatchCommand::PlayerLeft { side }));
    }

    #[test]
    fn test_deregister_exactly_once() {
        let mut registry = SessionRegistry::new();
        let (h, _rx) = handle(5, vec![(ConnectionId(1), Side::Left)]);
        tokio_test::assert_ok!(registry.register(h));

        assert!(registry.deregister(5).is_some());
        assert!(registry.deregister(5).is_none());
        assert!(registry.is_empty());
        assert!(!registry.contains(5));
        assert_eq!(registry.match_for(ConnectionId(1)), None);
    }

    #[test]
    fn test_route_to_closed_mailbox_is_a_miss() {
        let mut registry = SessionRegistry::new();
        let (h, rx) = handle(4, vec![(ConnectionId(1), Side::Left)]);
        registry.register(h).unwrap();
        drop(rx);

        assert!(!registry.route(ConnectionId(1), |side| MatchCommand::PlayerLeft { side }));
    }

    #[test]
    fn test_shared_connection_routes_as_first_seat() {
        let mut registry = SessionRegistry::new();
        let (h, _rx) = handle(
            8,
            vec![(ConnectionId(1), Side::Left), (ConnectionId(1), Side::Right)],
        );
        registry.register(h).unwrap();
        assert_eq!(registry.match_for(ConnectionId(1)), Some((8, Side::Left)));
        assert!(registry.lookup(8).is_some());
    }

    #[test]
    fn test_user_index_follows_match_lifetime() {
        let mut registry = SessionRegistry::new();
        let (mut h, _rx) = handle(6, vec![(ConnectionId(1), Side::Left)]);
        h.users = vec![41, 42];
        tokio_test::assert_ok!(registry.register(h));

        assert_eq!(registry.match_for_user(41), Some(6));
        assert_eq!(registry.match_for_user(42), Some(6));
        assert_eq!(registry.match_for_user(43), None);

        registry.deregister(6);
        assert_eq!(registry.match_for_user(41), None);
        assert_eq!(registry.match_for_user(42), None);
    }
}
