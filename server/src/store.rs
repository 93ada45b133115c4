//! Match records: allocated when a match is created, closed when it ends.
//!
//! The store is synchronous; async callers hand writes to
//! `tokio::task::spawn_blocking` so file IO never stalls a match task.

use crate::game::MatchId;
use crate::utils::get_timestamp;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::{GameMode, Scores, TeamPlayer, BOT_USER_ID};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("match {0} not found")]
    NotFound(MatchId),
    #[error("match {0} is already closed")]
    AlreadyClosed(MatchId),
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode match records: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("match store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Active,
    Finished,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub player1_id: u64,
    pub player2_id: u64,
    pub player1_score: u32,
    pub player2_score: u32,
    pub status: MatchStatus,
    /// Epoch milliseconds.
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub winner_id: Option<u64>,
    pub game_mode: GameMode,
    /// Rosters as JSON text.
    pub team1_players: Option<String>,
    pub team2_players: Option<String>,
    pub tournament_id: Option<u64>,
    pub tournament_match_id: Option<u64>,
}

impl MatchRecord {
    pub fn involves(&self, user_id: u64) -> bool {
        self.player1_id == user_id || self.player2_id == user_id
    }

    pub fn is_closed(&self) -> bool {
        self.status != MatchStatus::Active
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewMatch {
    pub player1_id: u64,
    pub player2_id: u64,
    pub game_mode: GameMode,
    pub team1_players: Option<Vec<TeamPlayer>>,
    pub team2_players: Option<Vec<TeamPlayer>>,
    pub tournament_id: Option<u64>,
    pub tournament_match_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub scores: Scores,
    pub winner_id: u64,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlayerStats {
    pub played: u32,
    pub wins: u32,
    pub losses: u32,
}

pub trait MatchStore: Send + Sync {
    /// Allocates a record with status `active` and returns it with its id.
    fn create_match(&self, new_match: NewMatch) -> Result<MatchRecord, StoreError>;

    /// Closes an active record. Closing twice is an error.
    fn finish_match(&self, id: MatchId, result: MatchResult) -> Result<MatchRecord, StoreError>;

    fn get(&self, id: MatchId) -> Result<Option<MatchRecord>, StoreError>;

    /// Closed matches involving `user_id`, newest first.
    fn history(&self, user_id: u64) -> Result<Vec<MatchRecord>, StoreError>;

    fn stats(&self, user_id: u64) -> Result<PlayerStats, StoreError>;
}

pub type SharedStore = Arc<dyn MatchStore>;

#[derive(Debug, Default)]
struct Records {
    records: Vec<MatchRecord>,
    next_id: MatchId,
}

impl Records {
    fn from_records(records: Vec<MatchRecord>) -> Self {
        let next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        Self { records, next_id }
    }

    fn create(&mut self, new_match: NewMatch) -> Result<MatchRecord, StoreError> {
        let id = self.next_id.max(1);
        self.next_id = id + 1;

        let record = MatchRecord {
            id,
            player1_id: new_match.player1_id,
            player2_id: new_match.player2_id,
            player1_score: 0,
            player2_score: 0,
            status: MatchStatus::Active,
            started_at: get_timestamp(),
            finished_at: None,
            winner_id: None,
            game_mode: new_match.game_mode,
            team1_players: encode_roster(new_match.team1_players.as_deref())?,
            team2_players: encode_roster(new_match.team2_players.as_deref())?,
            tournament_id: new_match.tournament_id,
            tournament_match_id: new_match.tournament_match_id,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn finish(&mut self, id: MatchId, result: MatchResult) -> Result<MatchRecord, StoreError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        if record.is_closed() {
            return Err(StoreError::AlreadyClosed(id));
        }
        record.player1_score = result.scores.player1;
        record.player2_score = result.scores.player2;
        record.winner_id = Some(result.winner_id);
        record.status = result.status;
        record.finished_at = Some(get_timestamp());
        Ok(record.clone())
    }

    /// Undoes a `create` whose write failed. Only the newest record can be
    /// discarded, so ids stay dense.
    fn discard(&mut self, id: MatchId) {
        if self.records.last().map(|r| r.id) == Some(id) {
            self.records.pop();
            self.next_id = id;
        }
    }

    /// Puts back a record as it was before a failed `finish`.
    fn restore(&mut self, previous: MatchRecord) {
        if let Some(record) = self.records.iter_mut().find(|r| r.id == previous.id) {
            *record = previous;
        }
    }

    fn get(&self, id: MatchId) -> Option<MatchRecord> {
        self.records.iter().find(|r| r.id == id).cloned()
    }

    fn history(&self, user_id: u64) -> Vec<MatchRecord> {
        let mut history: Vec<MatchRecord> = self
            .records
            .iter()
            .filter(|r| r.is_closed() && r.involves(user_id))
            .cloned()
            .collect();
        history.sort_by(|a, b| b.finished_at.cmp(&a.finished_at).then(b.id.cmp(&a.id)));
        history
    }

    fn stats(&self, user_id: u64) -> PlayerStats {
        let mut stats = PlayerStats::default();
        if user_id == BOT_USER_ID {
            return stats;
        }
        for record in self
            .records
            .iter()
            .filter(|r| r.is_closed() && r.involves(user_id))
        {
            stats.played += 1;
            if record.winner_id == Some(user_id) {
                stats.wins += 1;
            } else {
                stats.losses += 1;
            }
        }
        stats
    }
}

fn encode_roster(roster: Option<&[TeamPlayer]>) -> Result<Option<String>, StoreError> {
    roster
        .map(|players| serde_json::to_string(players))
        .transpose()
        .map_err(StoreError::from)
}

fn lock(records: &Mutex<Records>) -> Result<MutexGuard<'_, Records>, StoreError> {
    records.lock().map_err(|_| StoreError::Poisoned)
}

/// Records kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MatchStore for MemoryStore {
    fn create_match(&self, new_match: NewMatch) -> Result<MatchRecord, StoreError> {
        lock(&self.records)?.create(new_match)
    }

    fn finish_match(&self, id: MatchId, result: MatchResult) -> Result<MatchRecord, StoreError> {
        lock(&self.records)?.finish(id, result)
    }

    fn get(&self, id: MatchId) -> Result<Option<MatchRecord>, StoreError> {
        Ok(lock(&self.records)?.get(id))
    }

    fn history(&self, user_id: u64) -> Result<Vec<MatchRecord>, StoreError> {
        Ok(lock(&self.records)?.history(user_id))
    }

    fn stats(&self, user_id: u64) -> Result<PlayerStats, StoreError> {
        Ok(lock(&self.records)?.stats(user_id))
    }
}

/// Records mirrored to a JSON file, rewritten atomically after every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl JsonFileStore {
    /// Opens `path`, loading existing records if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let text = fs::read_to_string(&path)?;
            let records: Vec<MatchRecord> = if text.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&text)?
            };
            info!("Loaded {} match records from {}", records.len(), path.display());
            Records::from_records(records)
        } else {
            Records::from_records(Vec::new())
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &Records) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(&records.records)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            "Wrote {} match records to {}",
            records.records.len(),
            self.path.display()
        );
        Ok(())
    }
}

impl MatchStore for JsonFileStore {
    fn create_match(&self, new_match: NewMatch) -> Result<MatchRecord, StoreError> {
        let mut records = lock(&self.records)?;
        let record = records.create(new_match)?;
        if let Err(e) = self.persist(&records) {
            warn!("Match {} not saved, rolling back: {}", record.id, e);
            records.discard(record.id);
            return Err(e);
        }
        Ok(record)
    }

    fn finish_match(&self, id: MatchId, result: MatchResult) -> Result<MatchRecord, StoreError> {
        let mut records = lock(&self.records)?;
        let previous = records.get(id);
        let record = records.finish(id, result)?;
        if let Err(e) = self.persist(&records) {
            warn!("Result of match {} not saved, rolling back: {}", id, e);
            if let Some(previous) = previous {
                records.restore(previous);
            }
            return Err(e);
        }
        Ok(record)
    }

    fn get(&self, id: MatchId) -> Result<Option<MatchRecord>, StoreError> {
        Ok(lock(&self.records)?.get(id))
    }

    fn history(&self, user_id: u64) -> Result<Vec<MatchRecord>, StoreError> {
        Ok(lock(&self.records)?.history(user_id))
    }

    fn stats(&self, user_id: u64) -> Result<PlayerStats, StoreError> {
        Ok(lock(&self.records)?.stats(user_id))
    }
}
