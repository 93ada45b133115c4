//! Per-match task: fixed-step ticker plus mailbox
//!
//! Every live match runs on its own tokio task that exclusively owns the
//! [`Match`]. Inbound commands arrive through the mailbox registered in the
//! [`SessionRegistry`](crate::registry::SessionRegistry); snapshots leave
//! through a [`Broadcaster`]. The task deregisters the match, notifies the
//! participants and persists the result exactly once before it exits.

use crate::broadcast::Broadcaster;
use crate::client_manager::ConnectionHandle;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::game::{Match, MatchEvent};
use crate::registry::{MatchCommand, MatchHandle, SharedRegistry};
use crate::store::{MatchResult, MatchStatus, SharedStore};
use log::{debug, error, info, warn};
use shared::{EndReason, ServerMessage, Side, BOT_USER_ID};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Registers `game`, sends `gameStart` plus the first snapshot to every
/// human participant and spawns the match task.
pub async fn launch(
    game: Match,
    targets: Vec<(Side, ConnectionHandle)>,
    registry: &SharedRegistry,
    store: SharedStore,
    config: &ServerConfig,
) -> ServerResult<JoinHandle<()>> {
    let (sender, mailbox) = mpsc::unbounded_channel();
    let handle = MatchHandle {
        id: game.id,
        sender,
        connections: targets.iter().map(|(side, h)| (h.id, *side)).collect(),
        users: [&game.left, &game.right]
            .into_iter()
            .filter_map(|seat| seat.kind.user_id())
            .collect(),
    };
    registry.write().await.register(handle)?;

    let broadcaster = Broadcaster::new(targets, config.snapshot_interval());
    broadcaster.send(&game.start_message());
    broadcaster.send(&ServerMessage::GameState(game.snapshot()));
    info!(
        "[match {}] started: {} vs {} ({})",
        game.id,
        game.left.username,
        game.right.username,
        game.settings.game_mode.as_str()
    );

    let session = MatchSession {
        game,
        mailbox,
        broadcaster,
        registry: registry.clone(),
        store,
        tick: config.tick_duration(),
    };
    Ok(tokio::spawn(session.run()))
}

struct MatchSession {
    game: Match,
    mailbox: mpsc::UnboundedReceiver<MatchCommand>,
    broadcaster: Broadcaster,
    registry: SharedRegistry,
    store: SharedStore,
    tick: Duration,
}

impl MatchSession {
    async fn run(mut self) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                command = self.mailbox.recv() => {
                    match command {
                        Some(command) => {
                            if self.handle_command(command).await {
                                break;
                            }
                        }
                        None => {
                            warn!("[match {}] mailbox closed, stopping", self.game.id);
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if self.on_tick().await {
                        break;
                    }
                }
            }
        }
        debug!("[match {}] task finished", self.game.id);
    }

    /// Returns true once the match is over.
    async fn on_tick(&mut self) -> bool {
        let events = self.game.tick(Instant::now());
        for event in &events {
            self.log_event(event);
        }
        let due = self.broadcaster.snapshot_due();

        if self.game.is_finished() {
            self.finish(None).await;
            return true;
        }
        // Paused matches keep streaming frozen snapshots at the throttled rate.
        if self.game.is_paused() {
            if due {
                self.broadcast_snapshot();
            }
            return false;
        }
        if events.iter().any(MatchEvent::wants_snapshot) {
            self.broadcast_snapshot();
            self.broadcaster.reset_throttle();
        } else if due {
            self.broadcast_snapshot();
        }
        false
    }

    async fn handle_command(&mut self, command: MatchCommand) -> bool {
        match command {
            MatchCommand::Move { side, command } => {
                if self.game.move_paddle(side, &command) {
                    self.broadcast_snapshot();
                    self.broadcaster.reset_throttle();
                }
                false
            }
            MatchCommand::Pause { side, paused } => {
                let id = self.game.id;
                match self.game.set_paused(paused, Instant::now()) {
                    Some(true) => {
                        debug!("[match {}] pause requested by {}", id, side.seat_label());
                        self.broadcaster.send(&ServerMessage::GamePaused {
                            is_paused: true,
                            game_id: id,
                        });
                    }
                    Some(false) => {
                        self.broadcaster.send(&ServerMessage::GameResumed {
                            is_paused: false,
                            game_id: id,
                        });
                    }
                    None => debug!("[match {}] pause request ignored", id),
                }
                false
            }
            MatchCommand::PlayerLeft { side } => match self.game.abandon(side) {
                Some(_) => {
                    self.finish(Some(side)).await;
                    true
                }
                None => false,
            },
        }
    }

    fn broadcast_snapshot(&self) {
        self.broadcaster
            .send(&ServerMessage::GameState(self.game.snapshot()));
    }

    /// Ends the match: deregister, notify, persist. `leaver` marks an
    /// abandoned match whose remaining participant gets the only notice.
    async fn finish(&mut self, leaver: Option<Side>) {
        let id = self.game.id;
        if self.registry.write().await.deregister(id).is_none() {
            debug!("[match {}] already deregistered", id);
            return;
        }

        let status = match leaver {
            Some(side) => {
                self.broadcaster.drop_side(side);
                self.broadcaster
                    .send(&self.game.end_message(Some(EndReason::OpponentDisconnected)));
                MatchStatus::Abandoned
            }
            None => {
                self.broadcast_snapshot();
                self.broadcaster.send(&self.game.end_message(None));
                MatchStatus::Finished
            }
        };
        info!(
            "[match {}] ended {}-{}, winner {}",
            id,
            self.game.scores.player1,
            self.game.scores.player2,
            self.game.winner_id().unwrap_or(BOT_USER_ID)
        );

        let result = MatchResult {
            scores: self.game.scores,
            winner_id: self.game.winner_id().unwrap_or(BOT_USER_ID),
            status,
        };
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.finish_match(id, result)).await {
            Ok(Ok(record)) => debug!("[match {}] saved as {:?}", id, record.status),
            Ok(Err(e)) => error!("[match {}] failed to save result: {}", id, e),
            Err(e) => error!("[match {}] persistence task failed: {}", id, e),
        }
    }

    fn log_event(&self, event: &MatchEvent) {
        let id = self.game.id;
        match event {
            MatchEvent::Started => info!("[match {}] playing", id),
            MatchEvent::Scored { side, scores } => info!(
                "[match {}] {} scored ({}-{})",
                id,
                side.seat_label(),
                scores.player1,
                scores.player2
            ),
            MatchEvent::Finished { winner } => {
                info!("[match {}] {} wins", id, winner.seat_label())
            }
            other => debug!("[match {}] {:?}", id, other),
        }
    }
}
