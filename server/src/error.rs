use crate::game::MatchId;
use crate::store::StoreError;
use shared::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("player {0} is already waiting for a match")]
    DuplicateQueueEntry(u64),
    #[error("match {0} is already registered")]
    DuplicateMatch(MatchId),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
    #[error("failed to encode message: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
