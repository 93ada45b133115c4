//! Server network layer: WebSocket accept loop and per-connection tasks
//!
//! Every accepted socket is split into a reader, which runs on the
//! connection task and hands text frames to the [`Lobby`], and a writer task
//! that drains the connection's outbound queue. Matches only ever see the
//! queue's sender, so a slow socket never stalls a match tick.

use crate::error::ServerError;
use crate::lobby::Lobby;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::ServerMessage;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const SERVER_FULL_MESSAGE: &str = "Server full";

/// WebSocket front end of the match server
pub struct Server {
    listener: TcpListener,
    lobby: Lobby,
}

impl Server {
    pub async fn bind(addr: &str, lobby: Lobby) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Self { listener, lobby })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Server started successfully");
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let lobby = self.lobby.clone();
                    tokio::spawn(async move {
                        handle_connection(lobby, stream, addr).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    return Err(e.into());
                }
            }
        }
    }
}

async fn handle_connection(lobby: Lobby, stream: TcpStream, addr: SocketAddr) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let Some(connection) = lobby.connect(addr, out_tx).await else {
        warn!("Rejecting {}: server full", addr);
        if let Ok(text) = ServerMessage::error(SERVER_FULL_MESSAGE).to_json() {
            let _ = ws_sender.send(Message::Text(text)).await;
        }
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    };
    let connection_id = connection.id;

    // Outbound queue → socket
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(text)).await {
                debug!("Write to {} failed: {}", connection_id, e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => lobby.dispatch(&connection, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                warn!("Dropped binary frame from {}", connection_id);
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Socket error on {}: {}", connection_id, e);
                break;
            }
        }
    }

    lobby.disconnect(connection_id).await;
    writer.abort();
}
