//! Inbound protocol dispatch
//!
//! The lobby is the single entry point for decoded client messages. It owns
//! handles to every piece of shared server state:
//! - the matchmaking queue, for `joinGame`
//! - the session registry, for routing in-match control messages
//! - the connection table, for identities and the online listing
//! - the match store, for allocating and reading match records
//!
//! `Lobby` is cheap to clone; every connection task and bot-fill timer holds
//! its own copy.

use crate::client_manager::{
    ClientManager, ConnectionHandle, ConnectionId, OnlineUser, SharedClients,
};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::game::{Match, MatchId, PaddleCommand, Seat, COOP_HUMAN_SIDE};
use crate::matchmaking::{Enqueued, MatchmakingQueue, QueueEntry, SharedQueue};
use crate::registry::{MatchCommand, SessionRegistry, SharedRegistry};
use crate::session;
use crate::store::{MatchRecord, NewMatch, PlayerStats, SharedStore, StoreError};
use log::{debug, error, info, warn};
use shared::{
    ClientMessage, GameMode, GameSettings, JoinGame, ServerMessage, Side, UserConnect,
    BOT_USER_ID,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const CONNECTED_MESSAGE: &str = "Connected to game server";
pub const WAITING_MESSAGE: &str = "Waiting for opponent...";
pub const DUPLICATE_ENTRY_MESSAGE: &str = "Already waiting for a match.";
pub const ALREADY_IN_MATCH_MESSAGE: &str = "Already in a match.";
pub const START_FAILED_MESSAGE: &str = "Failed to start match. Please try again.";
pub const DEFAULT_PLAYER2_NAME: &str = "Player 2";

/// One seat of a match about to start, with the connection that drives it.
#[derive(Debug, Clone)]
pub struct Participant {
    pub seat: Seat,
    /// `None` for the bot.
    pub connection: Option<ConnectionHandle>,
}

impl Participant {
    pub fn human(user_id: u64, username: impl Into<String>, connection: ConnectionHandle) -> Self {
        Self {
            seat: Seat::human(user_id, username),
            connection: Some(connection),
        }
    }

    pub fn bot() -> Self {
        Self {
            seat: Seat::bot(),
            connection: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub left: Participant,
    pub right: Participant,
    pub settings: GameSettings,
    pub tournament_id: Option<u64>,
    pub tournament_match_id: Option<u64>,
}

impl MatchRequest {
    pub fn new(left: Participant, right: Participant, settings: GameSettings) -> Self {
        Self {
            left,
            right,
            settings,
            tournament_id: None,
            tournament_match_id: None,
        }
    }

    /// A single connection against the bot or a second local player; the
    /// caller takes the seat its connection owns.
    pub fn solo(caller: Participant, opponent: Participant, settings: GameSettings) -> Self {
        match COOP_HUMAN_SIDE {
            Side::Left => Self::new(caller, opponent, settings),
            Side::Right => Self::new(opponent, caller, settings),
        }
    }

    fn new_match(&self) -> NewMatch {
        NewMatch {
            player1_id: self.left.seat.kind.wire_id(),
            player2_id: self.right.seat.kind.wire_id(),
            game_mode: self.settings.game_mode,
            team1_players: self.settings.team1_players.clone(),
            team2_players: self.settings.team2_players.clone(),
            tournament_id: self.tournament_id,
            tournament_match_id: self.tournament_match_id,
        }
    }

    fn targets(&self) -> Vec<(Side, ConnectionHandle)> {
        [(Side::Left, &self.left), (Side::Right, &self.right)]
            .into_iter()
            .filter_map(|(side, p)| p.connection.clone().map(|c| (side, c)))
            .collect()
    }
}

#[derive(Clone)]
pub struct Lobby {
    queue: SharedQueue,
    registry: SharedRegistry,
    clients: SharedClients,
    store: SharedStore,
    config: Arc<ServerConfig>,
}

impl Lobby {
    pub fn new(config: ServerConfig, store: SharedStore) -> Self {
        Self {
            queue: Arc::new(Mutex::new(MatchmakingQueue::new())),
            registry: Arc::new(RwLock::new(SessionRegistry::new())),
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            store,
            config: Arc::new(config),
        }
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn clients(&self) -> &SharedClients {
        &self.clients
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Tracks a new socket. `None` when the server is full.
    pub async fn connect(
        &self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<String>,
    ) -> Option<ConnectionHandle> {
        self.clients.write().await.add_client(addr, sender)
    }

    /// Socket closed: forget it, then leave the queue or the current match.
    /// The client is dropped first so a match registered while `leave` runs
    /// still sees the seat as gone in [`Lobby::spawn_match`].
    pub async fn disconnect(&self, connection: ConnectionId) {
        self.clients.write().await.remove_client(&connection);
        self.leave(connection).await;
    }

    /// Drops the connection's queue entry, or abandons its match.
    pub async fn leave(&self, connection: ConnectionId) {
        if self.queue.lock().await.remove(connection).is_some() {
            return;
        }
        let routed = self
            .registry
            .read()
            .await
            .route(connection, |side| MatchCommand::PlayerLeft { side });
        if routed {
            info!("{} left its match", connection);
        }
    }

    pub async fn online_users(&self) -> Vec<OnlineUser> {
        self.clients.read().await.online_users()
    }

    pub async fn history(&self, user_id: u64) -> Result<Vec<MatchRecord>, StoreError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.history(user_id))
            .await
            .unwrap_or_else(|e| {
                error!("History lookup for {} failed: {}", user_id, e);
                Ok(Vec::new())
            })
    }

    pub async fn stats(&self, user_id: u64) -> Result<PlayerStats, StoreError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.stats(user_id))
            .await
            .unwrap_or_else(|e| {
                error!("Stats lookup for {} failed: {}", user_id, e);
                Ok(PlayerStats::default())
            })
    }

    /// Decodes one text frame from `connection` and acts on it.
    pub async fn dispatch(&self, connection: &ConnectionHandle, text: &str) {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(e) if e.is_validation() => {
                warn!("Rejected message from {}: {}", connection.id, e);
                connection.send(&ServerMessage::error(e.to_string()));
                return;
            }
            Err(e) => {
                warn!("Dropped message from {}: {}", connection.id, e);
                return;
            }
        };
        debug!("{} sent {}", connection.id, message.kind());

        match message {
            ClientMessage::UserConnect(request) => self.user_connect(connection, request).await,
            ClientMessage::JoinGame(request) => self.join_game(connection, request).await,
            ClientMessage::JoinBotGame(request) => self.join_bot_game(connection, request).await,
            ClientMessage::MovePaddle(request) => {
                let command = PaddleCommand::from_move(&request);
                self.route(connection.id, |side| MatchCommand::Move { side, command })
                    .await;
            }
            ClientMessage::Input(input) => match PaddleCommand::from_key(&input) {
                Some(command) => {
                    self.route(connection.id, |side| MatchCommand::Move { side, command })
                        .await;
                }
                None => debug!("Ignoring key {:?} from {}", input.key, connection.id),
            },
            ClientMessage::Pause(request) => {
                self.route(connection.id, |side| MatchCommand::Pause {
                    side,
                    paused: request.paused,
                })
                .await;
            }
            ClientMessage::Disconnect => self.leave(connection.id).await,
        }
    }

    async fn route(&self, connection: ConnectionId, build: impl FnOnce(Side) -> MatchCommand) {
        if !self.registry.read().await.route(connection, build) {
            debug!("Routing miss for {}", connection);
        }
    }

    async fn identify(&self, connection: ConnectionId, user_id: u64, username: &str) {
        self.clients
            .write()
            .await
            .identify(connection, user_id, username);
    }

    /// Refuses a new match or queue entry while the connection, or the
    /// player behind it on any other connection, is seated in a live match.
    async fn reject_if_in_match(&self, connection: &ConnectionHandle, user_id: u64) -> bool {
        let live = {
            let registry = self.registry.read().await;
            registry
                .match_for(connection.id)
                .map(|(id, _)| id)
                .or_else(|| registry.match_for_user(user_id))
        };
        match live {
            Some(id) => {
                debug!("Player {} is already in match {}", user_id, id);
                connection.send(&ServerMessage::error(ALREADY_IN_MATCH_MESSAGE));
                true
            }
            None => false,
        }
    }

    async fn user_connect(&self, connection: &ConnectionHandle, request: UserConnect) {
        self.identify(connection.id, request.user_id, &request.username)
            .await;

        let Some(game_mode) = request.game_mode else {
            connection.send(&ServerMessage::ConnectionAck {
                message: CONNECTED_MESSAGE.to_string(),
            });
            return;
        };
        if self.reject_if_in_match(connection, request.user_id).await {
            return;
        }
        self.leave_queue(connection.id, request.user_id).await;

        let settings = request
            .options
            .into_settings(game_mode)
            .with_rosters(request.team1_players, request.team2_players);
        let opponent = roster_opponent(&settings, connection);
        let caller = Participant::human(request.user_id, request.username, connection.clone());
        // Failures are reported to the caller inside start_match.
        let _ = self
            .start_match(MatchRequest::solo(caller, opponent, settings))
            .await;
    }

    async fn join_game(&self, connection: &ConnectionHandle, request: JoinGame) {
        self.identify(connection.id, request.user_id, &request.username)
            .await;
        if self.reject_if_in_match(connection, request.user_id).await {
            return;
        }

        let settings = request
            .game_settings
            .unwrap_or_default()
            .with_rosters(request.team1_players, request.team2_players)
            .normalized();
        let user_id = request.user_id;
        let entry = QueueEntry::new(user_id, request.username, connection.clone(), settings);

        let mut queue = self.queue.lock().await;
        match queue.enqueue(entry) {
            Ok(Enqueued::Paired(first, second)) => {
                drop(queue);
                let settings = first.settings.clone();
                let request = MatchRequest::new(
                    Participant::human(first.user_id, first.username, first.connection),
                    Participant::human(second.user_id, second.username, second.connection),
                    settings,
                );
                let _ = self.start_match(request).await;
            }
            Ok(Enqueued::Waiting) => {
                connection.send(&ServerMessage::Waiting {
                    message: WAITING_MESSAGE.to_string(),
                });
                let timer = self.spawn_bot_fill(user_id);
                queue.arm_timer(user_id, timer);
            }
            Err(ServerError::DuplicateQueueEntry(id)) => {
                debug!("Player {} is already queued", id);
                connection.send(&ServerMessage::error(DUPLICATE_ENTRY_MESSAGE));
            }
            Err(e) => error!("Failed to enqueue player {}: {}", user_id, e),
        }
    }

    async fn join_bot_game(&self, connection: &ConnectionHandle, request: JoinGame) {
        self.identify(connection.id, request.user_id, &request.username)
            .await;
        if self.reject_if_in_match(connection, request.user_id).await {
            return;
        }
        self.leave_queue(connection.id, request.user_id).await;

        let settings = request
            .game_settings
            .unwrap_or_default()
            .with_rosters(request.team1_players, request.team2_players);
        let opponent = match request.player2_id {
            Some(player2_id)
                if settings.game_mode == GameMode::Tournament && player2_id != BOT_USER_ID =>
            {
                let name = request
                    .player2_name
                    .unwrap_or_else(|| DEFAULT_PLAYER2_NAME.to_string());
                Participant {
                    seat: Seat::local(player2_id, name),
                    connection: Some(connection.clone()),
                }
            }
            _ => Participant::bot(),
        };
        let caller = Participant::human(request.user_id, request.username, connection.clone());

        let mut match_request = MatchRequest::solo(caller, opponent, settings);
        match_request.tournament_id = request.tournament_id;
        match_request.tournament_match_id = request.tournament_match_id;
        let _ = self.start_match(match_request).await;
    }

    /// Drops any waiting entry for this connection or player before a direct
    /// match starts.
    async fn leave_queue(&self, connection: ConnectionId, user_id: u64) {
        let mut queue = self.queue.lock().await;
        queue.remove(connection);
        queue.remove_user(user_id);
    }

    fn spawn_bot_fill(&self, user_id: u64) -> JoinHandle<()> {
        let lobby = self.clone();
        let timeout = self.config.bot_fill_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            lobby.fill_with_bot(user_id).await;
        })
    }

    /// Bot-fill timer expiry: pairs the player with the bot if nobody else
    /// showed up in the meantime.
    pub async fn fill_with_bot(&self, user_id: u64) {
        let entry = self.queue.lock().await.take_if_sole(user_id);
        let Some(entry) = entry else {
            debug!("Bot fill for {} skipped, no longer waiting alone", user_id);
            return;
        };
        info!(
            "No opponent for {} after {:?}, starting a bot match",
            entry.username,
            entry.enqueued_at.elapsed()
        );
        let caller = Participant::human(entry.user_id, entry.username, entry.connection);
        let _ = self
            .start_match(MatchRequest::solo(caller, Participant::bot(), entry.settings))
            .await;
    }

    /// Allocates the match record, builds the match and spawns its task.
    /// On failure every human participant gets an `error` reply.
    pub async fn start_match(&self, request: MatchRequest) -> ServerResult<MatchId> {
        let new_match = request.new_match();
        let store = self.store.clone();
        let created = tokio::task::spawn_blocking(move || store.create_match(new_match))
            .await
            .map_err(ServerError::from)
            .and_then(|record| record.map_err(ServerError::from));

        let result = match created {
            Ok(record) => {
                let targets = request.targets();
                let game = Match::new(
                    record.id,
                    request.left.seat.clone(),
                    request.right.seat.clone(),
                    request.settings.clone(),
                    Instant::now(),
                );
                self.spawn_match(game, targets).await.map(|_| record.id)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!("Failed to start match: {}", e);
            for (_, connection) in request.targets() {
                connection.send(&ServerMessage::error(START_FAILED_MESSAGE));
            }
        }
        result
    }

    /// Registers an already-built match and starts its task. A seat whose
    /// connection closed while the match was being set up is abandoned
    /// straight away, so the remaining player is told instead of facing an
    /// empty paddle.
    pub async fn spawn_match(
        &self,
        game: Match,
        targets: Vec<(Side, ConnectionHandle)>,
    ) -> ServerResult<JoinHandle<()>> {
        let id = game.id;
        let seats: Vec<ConnectionHandle> = targets.iter().map(|(_, h)| h.clone()).collect();
        let task = session::launch(
            game,
            targets,
            &self.registry,
            self.store.clone(),
            &self.config,
        )
        .await?;

        let gone: Vec<ConnectionId> = {
            let clients = self.clients.read().await;
            seats
                .iter()
                .filter(|h| h.is_closed() || clients.handle(&h.id).is_none())
                .map(|h| h.id)
                .collect()
        };
        for connection in gone {
            warn!("[match {}] {} disconnected before the start", id, connection);
            self.route(connection, |side| MatchCommand::PlayerLeft { side })
                .await;
        }
        Ok(task)
    }
}

/// Opponent for a direct match: a local second player when the opposing
/// roster names a human, otherwise the bot.
fn roster_opponent(settings: &GameSettings, connection: &ConnectionHandle) -> Participant {
    let local = settings
        .roster(COOP_HUMAN_SIDE.opposite())
        .iter()
        .filter(|player| !player.is_bot)
        .find_map(|player| {
            player
                .user_id
                .filter(|id| *id != BOT_USER_ID)
                .map(|id| (id, player.username.clone()))
        });
    match local {
        Some((user_id, username)) => Participant {
            seat: Seat::local(
                user_id,
                username.unwrap_or_else(|| DEFAULT_PLAYER2_NAME.to_string()),
            ),
            connection: Some(connection.clone()),
        },
        None => Participant::bot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::PlayerKind;
    use crate::store::{MatchStatus, MatchStore, MemoryStore};
    use shared::{EndReason, TeamPlayer};
    use std::time::Duration;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn lobby() -> (Lobby, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Lobby::new(ServerConfig::default(), store.clone()), store)
    }

    async fn connect(lobby: &Lobby) -> (ConnectionHandle, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (lobby.connect(test_addr(), tx).await.unwrap(), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(text) = rx.try_recv() {
            messages.push(ServerMessage::from_json(&text).unwrap());
        }
        messages
    }

    fn join(user_id: u64, name: &str) -> String {
        ClientMessage::JoinGame(JoinGame::new(user_id, name))
            .to_json()
            .unwrap()
    }

    #[tokio::test]
    async fn test_user_connect_acknowledged_and_listed() {
        let (lobby, _) = lobby();
        let (conn, mut rx) = connect(&lobby).await;

        lobby
            .dispatch(&conn, r#"{"type":"userConnect","userId":4,"username":"dana"}"#)
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::ConnectionAck {
                message: CONNECTED_MESSAGE.to_string()
            }]
        );
        let online = lobby.online_users().await;
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].username, "dana");
    }

    #[tokio::test]
    async fn test_validation_error_gets_reply() {
        let (lobby, _) = lobby();
        let (conn, mut rx) = connect(&lobby).await;

        lobby
            .dispatch(&conn, r#"{"type":"joinGame","username":"x"}"#)
            .await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_protocol_errors_are_dropped() {
        let (lobby, _) = lobby();
        let (conn, mut rx) = connect(&lobby).await;

        lobby.dispatch(&conn, "not json").await;
        lobby.dispatch(&conn, r#"{"type":"teleport"}"#).await;
        lobby.dispatch(&conn, r#"{"direction":"up"}"#).await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_control_message_without_match_is_ignored() {
        let (lobby, _) = lobby();
        let (conn, mut rx) = connect(&lobby).await;

        lobby
            .dispatch(&conn, r#"{"type":"movePaddle","direction":"up"}"#)
            .await;
        lobby.dispatch(&conn, r#"{"type":"pause"}"#).await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_join_rejected() {
        let (lobby, _) = lobby();
        let (first, mut rx1) = connect(&lobby).await;
        let (second, mut rx2) = connect(&lobby).await;

        lobby.dispatch(&first, &join(1, "ann")).await;
        lobby.dispatch(&second, &join(1, "ann")).await;

        assert!(matches!(drain(&mut rx1)[0], ServerMessage::Waiting { .. }));
        assert_eq!(
            drain(&mut rx2),
            vec![ServerMessage::error(DUPLICATE_ENTRY_MESSAGE)]
        );
        assert_eq!(lobby.queue().lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_queue_cancels_bot_fill() {
        let (lobby, store) = lobby();
        let (conn, mut rx) = connect(&lobby).await;

        lobby.dispatch(&conn, &join(1, "ann")).await;
        lobby.disconnect(conn.id).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(lobby.registry().read().await.is_empty());
        assert!(store.history(1).unwrap().is_empty());
        assert!(store.get(1).unwrap().is_none());
        assert!(drain(&mut rx)
            .iter()
            .all(|m| !matches!(m, ServerMessage::GameStart { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tournament_bot_game_with_local_second_player() {
        let (lobby, store) = lobby();
        let (conn, mut rx) = connect(&lobby).await;

        let mut request = JoinGame::new(3, "cleo");
        request.game_settings = Some(GameSettings {
            game_mode: GameMode::Tournament,
            ..GameSettings::default()
        });
        request.player2_id = Some(8);
        request.tournament_id = Some(12);
        let text = ClientMessage::JoinBotGame(request).to_json().unwrap();
        lobby.dispatch(&conn, &text).await;

        let messages = drain(&mut rx);
        let start_count = messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::GameStart { .. }))
            .count();
        assert_eq!(start_count, 1);
        match &messages[0] {
            ServerMessage::GameStart { players, game_id, .. } => {
                assert_eq!(players.player1.user_id, 3);
                assert_eq!(players.player2.user_id, 8);
                assert_eq!(players.player2.username, DEFAULT_PLAYER2_NAME);
                let record = store.get(*game_id).unwrap().unwrap();
                assert_eq!(record.status, MatchStatus::Active);
                assert_eq!(record.tournament_id, Some(12));
            }
            other => panic!("expected gameStart, got {:?}", other),
        }

        lobby.dispatch(&conn, &join(3, "cleo")).await;
        let errors: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::Error { .. }))
            .collect();
        assert_eq!(errors, vec![ServerMessage::error(ALREADY_IN_MATCH_MESSAGE)]);
        assert!(!lobby.queue().lock().await.contains(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_connect_with_mode_starts_bot_match() {
        let (lobby, _) = lobby();
        let (conn, mut rx) = connect(&lobby).await;

        lobby
            .dispatch(
                &conn,
                r#"{"type":"userConnect","userId":5,"username":"eve","gameMode":"arcade","team1PlayerCount":2,"scoreToWin":3}"#,
            )
            .await;

        match &drain(&mut rx)[0] {
            ServerMessage::GameStart {
                players,
                game_settings,
                ..
            } => {
                assert_eq!(players.player2.user_id, BOT_USER_ID);
                assert_eq!(game_settings.game_mode, GameMode::Arcade);
                assert_eq!(game_settings.team_size(Side::Left), 2);
                assert_eq!(game_settings.score_to_win, 3);
            }
            other => panic!("expected gameStart, got {:?}", other),
        }
        assert_eq!(lobby.registry().read().await.len(), 1);
    }

    #[test]
    fn test_roster_opponent_prefers_local_human() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionHandle::new(ConnectionId(1), tx);
        let mut settings = GameSettings {
            game_mode: GameMode::Arcade,
            ..GameSettings::default()
        };
        assert!(roster_opponent(&settings, &conn).seat.kind.is_bot());

        settings.team2_players = Some(vec![
            TeamPlayer {
                is_bot: true,
                ..TeamPlayer::default()
            },
            TeamPlayer {
                user_id: Some(9),
                username: Some("finn".into()),
                is_bot: false,
                paddle_index: Some(1),
            },
        ]);
        let opponent = roster_opponent(&settings, &conn);
        assert_eq!(opponent.seat.kind, PlayerKind::LocalSeat(9));
        assert_eq!(opponent.seat.username, "finn");
        assert_eq!(opponent.connection.map(|c| c.id), Some(ConnectionId(1)));
    }

    #[tokio::test]
    async fn test_start_failure_replies_to_humans() {
        struct FailingStore;

        impl MatchStore for FailingStore {
            fn create_match(&self, _: NewMatch) -> Result<MatchRecord, StoreError> {
                Err(StoreError::Poisoned)
            }
            fn finish_match(
                &self,
                id: MatchId,
                _: crate::store::MatchResult,
            ) -> Result<MatchRecord, StoreError> {
                Err(StoreError::NotFound(id))
            }
            fn get(&self, _: MatchId) -> Result<Option<MatchRecord>, StoreError> {
                Ok(None)
            }
            fn history(&self, _: u64) -> Result<Vec<MatchRecord>, StoreError> {
                Ok(Vec::new())
            }
            fn stats(&self, _: u64) -> Result<PlayerStats, StoreError> {
                Ok(PlayerStats::default())
            }
        }

        let lobby = Lobby::new(ServerConfig::default(), Arc::new(FailingStore));
        let (conn, mut rx) = connect(&lobby).await;
        let text = ClientMessage::JoinBotGame(JoinGame::new(2, "gus"))
            .to_json()
            .unwrap();
        lobby.dispatch(&conn, &text).await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::error(START_FAILED_MESSAGE)]
        );
        assert!(lobby.registry().read().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connection_cannot_queue_while_in_match() {
        let (lobby, _) = lobby();
        let (first, mut rx1) = connect(&lobby).await;
        let (second, mut rx2) = connect(&lobby).await;

        let bot_game = ClientMessage::JoinBotGame(JoinGame::new(6, "hal"))
            .to_json()
            .unwrap();
        lobby.dispatch(&first, &bot_game).await;
        assert!(drain(&mut rx1)
            .iter()
            .any(|m| matches!(m, ServerMessage::GameStart { .. })));

        lobby.dispatch(&second, &join(6, "hal")).await;
        lobby.dispatch(&second, &bot_game).await;

        assert_eq!(
            drain(&mut rx2),
            vec![
                ServerMessage::error(ALREADY_IN_MATCH_MESSAGE),
                ServerMessage::error(ALREADY_IN_MATCH_MESSAGE)
            ]
        );
        assert!(lobby.queue().lock().await.is_empty());
        assert_eq!(lobby.registry().read().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_match_clears_queue_entry_from_other_connection() {
        let (lobby, _) = lobby();
        let (first, _rx1) = connect(&lobby).await;
        let (second, _rx2) = connect(&lobby).await;

        lobby.dispatch(&first, &join(7, "ivy")).await;
        assert!(lobby.queue().lock().await.contains(7));

        let bot_game = ClientMessage::JoinBotGame(JoinGame::new(7, "ivy"))
            .to_json()
            .unwrap();
        lobby.dispatch(&second, &bot_game).await;

        assert!(!lobby.queue().lock().await.contains(7));
        assert!(lobby.registry().read().await.match_for_user(7).is_some());
    }

    /// Store whose record allocation takes long enough for a player to
    /// disconnect while the match is being set up.
    struct SlowStore(MemoryStore);

    impl MatchStore for SlowStore {
        fn create_match(&self, new_match: NewMatch) -> Result<MatchRecord, StoreError> {
            std::thread::sleep(Duration::from_millis(200));
            self.0.create_match(new_match)
        }
        fn finish_match(
            &self,
            id: MatchId,
            result: crate::store::MatchResult,
        ) -> Result<MatchRecord, StoreError> {
            self.0.finish_match(id, result)
        }
        fn get(&self, id: MatchId) -> Result<Option<MatchRecord>, StoreError> {
            self.0.get(id)
        }
        fn history(&self, user_id: u64) -> Result<Vec<MatchRecord>, StoreError> {
            self.0.history(user_id)
        }
        fn stats(&self, user_id: u64) -> Result<PlayerStats, StoreError> {
            self.0.stats(user_id)
        }
    }

    #[tokio::test]
    async fn test_disconnect_during_match_setup_abandons_match() {
        let store = Arc::new(SlowStore(MemoryStore::new()));
        let lobby = Lobby::new(ServerConfig::default(), store.clone());
        let (first, _rx1) = connect(&lobby).await;
        let (second, mut rx2) = connect(&lobby).await;

        lobby.dispatch(&first, &join(1, "ann")).await;
        let pairing = {
            let lobby = lobby.clone();
            tokio::spawn(async move { lobby.dispatch(&second, &join(2, "bea")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        lobby.disconnect(first.id).await;
        pairing.await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(lobby.registry().read().await.is_empty());
        let ends: Vec<_> = drain(&mut rx2)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::GameEnd { winner, reason, .. } => Some((winner, reason)),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![(2, Some(EndReason::OpponentDisconnected))]);
        let record = store.get(1).unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Abandoned);
        assert_eq!(record.winner_id, Some(2));
    }
}
