//! Connection tracking for the match server
//!
//! This module keeps the table of open WebSocket connections, including:
//! - Connection ids and the outbound channel of each socket
//! - The player identity a connection announced with `userConnect`/`joinGame`
//! - Capacity limits and the online-user listing
//!
//! Matches and the queue never hold sockets directly; they hold a
//! [`ConnectionHandle`], which only knows how to enqueue a text frame.

use log::{debug, info};
use serde::Serialize;
use shared::ServerMessage;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

/// Server-assigned id of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Cloneable sender half of a connection's outbound queue
///
/// Frames are pre-serialized JSON so a broadcast encodes once and every
/// recipient receives the same string. Sending to a closed connection is
/// a silent no-op reported through the return value.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    sender: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, sender: mpsc::UnboundedSender<String>) -> Self {
        Self { id, sender }
    }

    /// Queues an already-encoded frame. Returns false if the socket is gone.
    pub fn send_text(&self, text: String) -> bool {
        self.sender.send(text).is_ok()
    }

    /// Encodes and queues a message for this connection only.
    pub fn send(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(text) => self.send_text(text),
            Err(e) => {
                debug!("Failed to encode message for {}: {}", self.id, e);
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Player identity attached to a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: u64,
    pub username: String,
}

/// Represents one open connection
#[derive(Debug)]
pub struct Client {
    /// Unique connection identifier assigned by the server
    pub id: ConnectionId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    /// When the socket was accepted
    pub connected_at: Instant,
    /// Set once the peer identifies itself
    pub user: Option<OnlineUser>,
    handle: ConnectionHandle,
}

impl Client {
    /// Creates a new, not yet identified client
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            user: None,
            handle: ConnectionHandle::new(id, sender),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }
}

/// Manages all open connections
///
/// The ClientManager enforces the connection cap and answers "who is this
/// socket" and "who is online" for the lobby. It is shared behind a
/// `tokio::sync::RwLock`; see [`SharedClients`].
pub struct ClientManager {
    /// Open connections indexed by their id
    clients: HashMap<ConnectionId, Client>,
    /// Next id handed to a new connection
    next_client_id: u64,
    /// Maximum number of concurrent connections allowed
    max_clients: usize,
}

pub type SharedClients = Arc<RwLock<ClientManager>>;

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    ///
    /// Connection ids start from 1 and are never reused.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a freshly accepted socket
    ///
    /// Returns the connection's handle, or None if the server is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<String>,
    ) -> Option<ConnectionHandle> {
        // Enforce server capacity limits
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let id = ConnectionId(self.next_client_id);
        self.next_client_id += 1;

        let client = Client::new(id, addr, sender);
        let handle = client.handle();
        info!("Client {} connected from {}", id, addr);
        self.clients.insert(id, client);

        Some(handle)
    }

    /// Removes a connection
    ///
    /// Returns the removed client, or None if it was already gone.
    pub fn remove_client(&mut self, id: &ConnectionId) -> Option<Client> {
        let client = self.clients.remove(id)?;
        match &client.user {
            Some(user) => info!(
                "Client {} ({} #{}) disconnected",
                client.id, user.username, user.user_id
            ),
            None => info!("Client {} disconnected", client.id),
        }
        Some(client)
    }

    /// Attaches a player identity to a connection
    ///
    /// Re-identifying replaces the previous identity. Returns false if the
    /// connection is unknown.
    pub fn identify(&mut self, id: ConnectionId, user_id: u64, username: &str) -> bool {
        match self.clients.get_mut(&id) {
            Some(client) => {
                if client.user.as_ref().map(|u| u.user_id) != Some(user_id) {
                    debug!("Client {} identified as {} #{}", id, username, user_id);
                }
                client.user = Some(OnlineUser {
                    user_id,
                    username: username.to_string(),
                });
                true
            }
            None => false,
        }
    }

    pub fn handle(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.clients.get(id).map(Client::handle)
    }

    /// Identified players, one entry per user id, ordered by id
    pub fn online_users(&self) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = self
            .clients
            .values()
            .filter_map(|c| c.user.clone())
            .collect();
        users.sort_by_key(|u| u.user_id);
        users.dedup_by_key(|u| u.user_id);
        users
    }

    /// Returns the number of open connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no connections are open
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
