//! FIFO matchmaking queue with cancellable bot-fill timers
//!
//! Entries pair strictly by arrival. A lone entry gets a timer task; when it
//! fires and the entry is still alone, the lobby pairs it against a bot.
//! Every path that removes an entry also aborts its timer, except
//! [`MatchmakingQueue::take_if_sole`], which runs on the timer task itself.

use crate::client_manager::{ConnectionHandle, ConnectionId};
use crate::error::ServerError;
use log::{debug, info};
use shared::GameSettings;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug)]
pub struct QueueEntry {
    pub user_id: u64,
    pub username: String,
    pub connection: ConnectionHandle,
    pub settings: GameSettings,
    pub enqueued_at: Instant,
    timer: Option<JoinHandle<()>>,
}

impl QueueEntry {
    pub fn new(
        user_id: u64,
        username: impl Into<String>,
        connection: ConnectionHandle,
        settings: GameSettings,
    ) -> Self {
        Self {
            user_id,
            username: username.into(),
            connection,
            settings,
            enqueued_at: Instant::now(),
            timer: None,
        }
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug)]
pub enum Enqueued {
    /// The two longest-waiting entries, oldest first, timers cancelled.
    Paired(QueueEntry, QueueEntry),
    Waiting,
}

#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    entries: VecDeque<QueueEntry>,
}

pub type SharedQueue = Arc<Mutex<MatchmakingQueue>>;

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, entry: QueueEntry) -> Result<Enqueued, ServerError> {
        if self.contains(entry.user_id) {
            return Err(ServerError::DuplicateQueueEntry(entry.user_id));
        }
        info!("Player {} ({}) joined the queue", entry.username, entry.user_id);
        self.entries.push_back(entry);

        if self.entries.len() < 2 {
            return Ok(Enqueued::Waiting);
        }
        match (self.entries.pop_front(), self.entries.pop_front()) {
            (Some(mut first), Some(mut second)) => {
                first.cancel_timer();
                second.cancel_timer();
                info!(
                    "Paired {} ({}) with {} ({})",
                    first.username, first.user_id, second.username, second.user_id
                );
                Ok(Enqueued::Paired(first, second))
            }
            _ => Ok(Enqueued::Waiting),
        }
    }

    /// Attaches a bot-fill timer to a waiting entry. If the entry already
    /// left the queue the timer is aborted straight away.
    pub fn arm_timer(&mut self, user_id: u64, timer: JoinHandle<()>) {
        match self.entries.iter_mut().find(|e| e.user_id == user_id) {
            Some(entry) => {
                entry.cancel_timer();
                entry.timer = Some(timer);
            }
            None => timer.abort(),
        }
    }

    /// Dequeues `user_id` if it is the only waiting entry. Called from the
    /// entry's own timer task, so the handle is dropped rather than aborted.
    pub fn take_if_sole(&mut self, user_id: u64) -> Option<QueueEntry> {
        if self.entries.len() != 1 || self.entries.front()?.user_id != user_id {
            return None;
        }
        let mut entry = self.entries.pop_front()?;
        entry.timer = None;
        Some(entry)
    }

    /// Removes the entry owned by a connection. Idempotent.
    pub fn remove(&mut self, connection: ConnectionId) -> Option<QueueEntry> {
        let position = self
            .entries
            .iter()
            .position(|e| e.connection.id == connection)?;
        let mut entry = self.entries.remove(position)?;
        entry.cancel_timer();
        debug!("Player {} left the queue", entry.user_id);
        Some(entry)
    }

    /// Removes the entry queued under `user_id`, whichever connection owns it.
    pub fn remove_user(&mut self, user_id: u64) -> Option<QueueEntry> {
        let position = self.entries.iter().position(|e| e.user_id == user_id)?;
        let mut entry = self.entries.remove(position)?;
        entry.cancel_timer();
        debug!("Player {} left the queue", entry.user_id);
        Some(entry)
    }

    pub fn contains(&self, user_id: u64) -> bool {
        self.entries.iter().any(|e| e.user_id == user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
