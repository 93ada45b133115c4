use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const FIELD_WIDTH: f32 = 800.0;
pub const FIELD_HEIGHT: f32 = 600.0;
pub const FIELD_CENTER_X: f32 = FIELD_WIDTH / 2.0;
pub const FIELD_CENTER_Y: f32 = FIELD_HEIGHT / 2.0;
pub const PADDLE_WIDTH: f32 = 10.0;
pub const PADDLE_HEIGHT: f32 = 100.0;
/// Keeps the paddle's bottom edge off the last rows of the field so it never clips.
pub const PADDLE_BOTTOM_BUFFER: f32 = 2.0;
pub const LEFT_PADDLE_X: f32 = 50.0;
pub const RIGHT_PADDLE_X: f32 = 750.0;
pub const BALL_RADIUS: f32 = 5.0;
pub const POWERUP_RADIUS: f32 = 15.0;
/// Wire id used for the synthetic bot seat.
pub const BOT_USER_ID: u64 = 0;
pub const BOT_USERNAME: &str = "Bot";
pub const COUNTDOWN_START: u32 = 3;
pub const DEFAULT_SCORE_TO_WIN: u32 = 5;
pub const MAX_TEAM_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    #[serde(alias = "campaign")]
    Coop,
    Arcade,
    Tournament,
}

impl GameMode {
    /// Team modes lay out a roster of paddles per side.
    pub fn is_team(&self) -> bool {
        matches!(self, GameMode::Arcade | GameMode::Tournament)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Coop => "coop",
            GameMode::Arcade => "arcade",
            GameMode::Tournament => "tournament",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedTier {
    Slow,
    #[default]
    Medium,
    Fast,
}

impl SpeedTier {
    /// Ball speed in pixels per tick.
    pub fn ball_speed(&self) -> f32 {
        match self {
            SpeedTier::Slow => 6.0,
            SpeedTier::Medium => 8.0,
            SpeedTier::Fast => 12.0,
        }
    }

    /// Distance a paddle travels for one move request.
    pub fn paddle_step(&self) -> f32 {
        match self {
            SpeedTier::Slow => 8.0,
            SpeedTier::Medium => 13.0,
            SpeedTier::Fast => 18.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Wire label of the seat on this side.
    pub fn seat_label(&self) -> &'static str {
        match self {
            Side::Left => "player1",
            Side::Right => "player2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Countdown,
    Playing,
    Finished,
}

/// One member of a team roster as sent by the lobby UI.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TeamPlayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub is_bot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paddle_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameSettings {
    pub game_mode: GameMode,
    pub ai_difficulty: Difficulty,
    pub ball_speed: SpeedTier,
    pub paddle_speed: SpeedTier,
    pub powerups_enabled: bool,
    pub accelerate_on_hit: bool,
    pub score_to_win: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team1_player_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team2_player_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team1_players: Option<Vec<TeamPlayer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team2_players: Option<Vec<TeamPlayer>>,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            game_mode: GameMode::Coop,
            ai_difficulty: Difficulty::Medium,
            ball_speed: SpeedTier::Medium,
            paddle_speed: SpeedTier::Medium,
            powerups_enabled: false,
            accelerate_on_hit: false,
            score_to_win: DEFAULT_SCORE_TO_WIN,
            team1_player_count: None,
            team2_player_count: None,
            team1_players: None,
            team2_players: None,
        }
    }
}

impl GameSettings {
    pub fn roster(&self, side: Side) -> &[TeamPlayer] {
        let roster = match side {
            Side::Left => &self.team1_players,
            Side::Right => &self.team2_players,
        };
        roster.as_deref().unwrap_or(&[])
    }

    /// Number of paddles on a side. Co-op always has one; team modes take the
    /// roster length, then the declared count, clamped to `1..=MAX_TEAM_SIZE`.
    pub fn team_size(&self, side: Side) -> usize {
        if !self.game_mode.is_team() {
            return 1;
        }
        let declared = match side {
            Side::Left => self.team1_player_count,
            Side::Right => self.team2_player_count,
        };
        let roster_len = self.roster(side).len();
        let size = if roster_len > 0 {
            roster_len
        } else {
            declared.unwrap_or(1)
        };
        size.clamp(1, MAX_TEAM_SIZE)
    }

    /// Returns a copy with rosters attached, leaving existing rosters untouched
    /// when the caller supplies none.
    pub fn with_rosters(
        mut self,
        team1: Option<Vec<TeamPlayer>>,
        team2: Option<Vec<TeamPlayer>>,
    ) -> Self {
        if team1.is_some() {
            self.team1_players = team1;
        }
        if team2.is_some() {
            self.team2_players = team2;
        }
        self
    }

    pub fn normalized(mut self) -> Self {
        self.score_to_win = self.score_to_win.max(1);
        self
    }
}

/// Inline game options carried by `userConnect`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_difficulty: Option<Difficulty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ball_speed: Option<SpeedTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paddle_speed: Option<SpeedTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub powerups_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerate_on_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_to_win: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team1_player_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team2_player_count: Option<usize>,
}

impl ConnectOptions {
    pub fn into_settings(self, game_mode: GameMode) -> GameSettings {
        let defaults = GameSettings::default();
        GameSettings {
            game_mode,
            ai_difficulty: self.ai_difficulty.unwrap_or(defaults.ai_difficulty),
            ball_speed: self.ball_speed.unwrap_or(defaults.ball_speed),
            paddle_speed: self.paddle_speed.unwrap_or(defaults.paddle_speed),
            powerups_enabled: self.powerups_enabled.unwrap_or(false),
            accelerate_on_hit: self.accelerate_on_hit.unwrap_or(false),
            score_to_win: self.score_to_win.unwrap_or(DEFAULT_SCORE_TO_WIN),
            team1_player_count: Some(self.team1_player_count.unwrap_or(1)),
            team2_player_count: Some(self.team2_player_count.unwrap_or(1)),
            team1_players: None,
            team2_players: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConnect {
    pub user_id: u64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_mode: Option<GameMode>,
    #[serde(flatten)]
    pub options: ConnectOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team1_players: Option<Vec<TeamPlayer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team2_players: Option<Vec<TeamPlayer>>,
}

/// Body shared by `joinGame` and `joinBotGame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGame {
    pub user_id: u64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_settings: Option<GameSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team1_players: Option<Vec<TeamPlayer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team2_players: Option<Vec<TeamPlayer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player2_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player2_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_match_id: Option<u64>,
}

impl JoinGame {
    pub fn new(user_id: u64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            game_settings: None,
            team1_players: None,
            team2_players: None,
            player2_id: None,
            player2_name: None,
            tournament_id: None,
            tournament_match_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePaddle {
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    /// Signed so a negative index decodes and is ignored like any other
    /// index with no paddle behind it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paddle_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInput {
    pub key: String,
    pub pressed: bool,
}

impl KeyInput {
    /// Maps a keyboard key to a paddle direction.
    pub fn direction(&self) -> Option<Direction> {
        match self.key.as_str() {
            "ArrowUp" | "w" | "W" => Some(Direction::Up),
            "ArrowDown" | "s" | "S" => Some(Direction::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PauseRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message has no type tag")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` message: {reason}")]
    Invalid { kind: String, reason: String },
}

impl ProtocolError {
    /// Validation failures get an `error` reply; everything else is dropped.
    pub fn is_validation(&self) -> bool {
        matches!(self, ProtocolError::Invalid { .. })
    }
}

/// Messages sent from clients to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    UserConnect(UserConnect),
    JoinGame(JoinGame),
    JoinBotGame(JoinGame),
    MovePaddle(MovePaddle),
    Input(KeyInput),
    Pause(PauseRequest),
    Disconnect,
}

impl ClientMessage {
    /// Decodes one text frame. Classifies failures so the caller can decide
    /// between replying and dropping.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_owned();

        let message = match kind.as_str() {
            "userConnect" => ClientMessage::UserConnect(decode(value, &kind)?),
            "joinGame" => ClientMessage::JoinGame(decode(value, &kind)?),
            "joinBotGame" => ClientMessage::JoinBotGame(decode(value, &kind)?),
            "movePaddle" => ClientMessage::MovePaddle(decode(value, &kind)?),
            "input" => ClientMessage::Input(decode(value, &kind)?),
            "pause" => ClientMessage::Pause(decode(value, &kind)?),
            "disconnect" => ClientMessage::Disconnect,
            _ => return Err(ProtocolError::UnknownType(kind)),
        };
        Ok(message)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::UserConnect(_) => "userConnect",
            ClientMessage::JoinGame(_) => "joinGame",
            ClientMessage::JoinBotGame(_) => "joinBotGame",
            ClientMessage::MovePaddle(_) => "movePaddle",
            ClientMessage::Input(_) => "input",
            ClientMessage::Pause(_) => "pause",
            ClientMessage::Disconnect => "disconnect",
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value, kind: &str) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::Invalid {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BallState {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub frozen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PaddleState {
    pub x: f32,
    pub y: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PaddleSet {
    pub player1: PaddleState,
    pub player2: PaddleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team1: Option<Vec<PaddleState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team2: Option<Vec<PaddleState>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scores {
    pub player1: u32,
    pub player2: u32,
}

impl Scores {
    pub fn get(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.player1,
            Side::Right => self.player2,
        }
    }

    pub fn add_point(&mut self, side: Side) -> u32 {
        let score = match side {
            Side::Left => &mut self.player1,
            Side::Right => &mut self.player2,
        };
        *score += 1;
        *score
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PowerupState {
    pub x: f32,
    pub y: f32,
    pub active: bool,
    pub radius: f32,
}

/// Authoritative state pushed to both participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub ball: BallState,
    pub paddles: PaddleSet,
    pub scores: Scores,
    pub game_state: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown_value: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powerup: Option<PowerupState>,
    #[serde(default)]
    pub is_paused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub user_id: u64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartPlayers {
    pub player1: PlayerInfo,
    pub player2: PlayerInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    OpponentDisconnected,
}

/// Messages sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    ConnectionAck {
        message: String,
    },
    Waiting {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    GameStart {
        game_id: u64,
        players: StartPlayers,
        game_settings: GameSettings,
    },
    GameState(Snapshot),
    #[serde(rename_all = "camelCase")]
    GamePaused {
        is_paused: bool,
        game_id: u64,
    },
    #[serde(rename_all = "camelCase")]
    GameResumed {
        is_paused: bool,
        game_id: u64,
    },
    #[serde(rename_all = "camelCase")]
    GameEnd {
        winner: u64,
        scores: Scores,
        game_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<EndReason>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_parse_join_game_with_settings() {
        let text = r#"{"type":"joinGame","userId":7,"username":"ana",
            "gameSettings":{"gameMode":"arcade","ballSpeed":"fast","scoreToWin":3}}"#;

        match ClientMessage::from_json(text).unwrap() {
            ClientMessage::JoinGame(join) => {
                assert_eq!(join.user_id, 7);
                assert_eq!(join.username, "ana");
                let settings = join.game_settings.unwrap();
                assert_eq!(settings.game_mode, GameMode::Arcade);
                assert_eq!(settings.ball_speed, SpeedTier::Fast);
                assert_eq!(settings.paddle_speed, SpeedTier::Medium);
                assert_eq!(settings.score_to_win, 3);
                assert!(!settings.powerups_enabled);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_parse_user_connect_flattened_options() {
        let text = r#"{"type":"userConnect","userId":3,"username":"bo","gameMode":"tournament",
            "aiDifficulty":"hard","powerupsEnabled":true,"team1PlayerCount":2,
            "team2Players":[{"isBot":true,"paddleIndex":0}]}"#;

        match ClientMessage::from_json(text).unwrap() {
            ClientMessage::UserConnect(connect) => {
                assert_eq!(connect.game_mode, Some(GameMode::Tournament));
                assert_eq!(connect.options.ai_difficulty, Some(Difficulty::Hard));
                assert_eq!(connect.options.powerups_enabled, Some(true));
                let roster = connect.team2_players.unwrap();
                assert!(roster[0].is_bot);
                assert_eq!(roster[0].paddle_index, Some(0));

                let settings = connect.options.into_settings(GameMode::Tournament);
                assert_eq!(settings.team1_player_count, Some(2));
                assert_eq!(settings.team2_player_count, Some(1));
                assert_eq!(settings.score_to_win, DEFAULT_SCORE_TO_WIN);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_campaign_is_alias_for_coop() {
        let settings: GameSettings = serde_json::from_str(r#"{"gameMode":"campaign"}"#).unwrap();
        assert_eq!(settings.game_mode, GameMode::Coop);
        assert!(!settings.game_mode.is_team());
    }

    #[test]
    fn test_parse_move_paddle_variants() {
        let by_side = r#"{"type":"movePaddle","direction":"up","side":"right","paddleIndex":1}"#;
        match ClientMessage::from_json(by_side).unwrap() {
            ClientMessage::MovePaddle(mv) => {
                assert_eq!(mv.direction, Direction::Up);
                assert_eq!(mv.side, Some(Side::Right));
                assert_eq!(mv.paddle_index, Some(1));
                assert_eq!(mv.player_id, None);
            }
            other => panic!("Wrong message type: {:?}", other),
        }

        let negative = r#"{"type":"movePaddle","direction":"up","paddleIndex":-3}"#;
        match ClientMessage::from_json(negative).unwrap() {
            ClientMessage::MovePaddle(mv) => assert_eq!(mv.paddle_index, Some(-3)),
            other => panic!("Wrong message type: {:?}", other),
        }

        let by_id = r#"{"type":"movePaddle","direction":"down","playerId":42}"#;
        match ClientMessage::from_json(by_id).unwrap() {
            ClientMessage::MovePaddle(mv) => {
                assert_eq!(mv.direction, Direction::Down);
                assert_eq!(mv.player_id, Some(42));
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = ClientMessage::from_json(r#"{"type":"teleport"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("teleport".to_string()));
        assert!(!err.is_validation());
    }

    #[test]
    fn test_malformed_and_untagged_messages() {
        let err = ClientMessage::from_json("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));

        let err = ClientMessage::from_json(r#"{"userId":1}"#).unwrap_err();
        assert_eq!(err, ProtocolError::MissingType);
    }

    #[test]
    fn test_missing_field_is_validation_error() {
        let err = ClientMessage::from_json(r#"{"type":"joinGame","username":"x"}"#).unwrap_err();
        assert!(err.is_validation());
        match err {
            ProtocolError::Invalid { kind, reason } => {
                assert_eq!(kind, "joinGame");
                assert!(reason.contains("userId"));
            }
            other => panic!("Unexpected error: {:?}", other),
        }

        let err = ClientMessage::from_json(r#"{"type":"movePaddle","direction":"left"}"#)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_key_input_direction() {
        let up = KeyInput {
            key: "W".to_string(),
            pressed: true,
        };
        let down = KeyInput {
            key: "ArrowDown".to_string(),
            pressed: true,
        };
        let other = KeyInput {
            key: "Space".to_string(),
            pressed: true,
        };
        assert_eq!(up.direction(), Some(Direction::Up));
        assert_eq!(down.direction(), Some(Direction::Down));
        assert_eq!(other.direction(), None);
    }

    #[test]
    fn test_client_message_serializes_with_tag() {
        let message = ClientMessage::JoinGame(JoinGame::new(5, "eve"));
        let text = message.to_json().unwrap();
        assert!(text.contains(r#""type":"joinGame""#));
        assert!(text.contains(r#""userId":5"#));
        assert_eq!(ClientMessage::from_json(&text).unwrap(), message);

        let text = ClientMessage::Disconnect.to_json().unwrap();
        assert_eq!(text, r#"{"type":"disconnect"}"#);
    }

    #[test]
    fn test_snapshot_omits_countdown_outside_countdown() {
        let snapshot = Snapshot {
            ball: BallState {
                x: 400.0,
                y: 300.0,
                dx: 8.0,
                dy: -1.5,
                frozen: false,
            },
            paddles: PaddleSet::default(),
            scores: Scores {
                player1: 2,
                player2: 1,
            },
            game_state: Phase::Playing,
            countdown_value: None,
            powerup: None,
            is_paused: false,
        };

        let text = ServerMessage::GameState(snapshot.clone()).to_json().unwrap();
        assert!(text.contains(r#""type":"gameState""#));
        assert!(text.contains(r#""gameState":"playing""#));
        assert!(!text.contains("countdownValue"));
        assert!(!text.contains("team1"));

        match ServerMessage::from_json(&text).unwrap() {
            ServerMessage::GameState(parsed) => {
                assert_approx_eq!(parsed.ball.dy, -1.5, 1e-6);
                assert_eq!(parsed.scores, snapshot.scores);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_game_end_wire_shape() {
        let message = ServerMessage::GameEnd {
            winner: 9,
            scores: Scores {
                player1: 5,
                player2: 3,
            },
            game_id: 12,
            reason: Some(EndReason::OpponentDisconnected),
        };
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "gameEnd");
        assert_eq!(value["gameId"], 12);
        assert_eq!(value["winner"], 9);
        assert_eq!(value["reason"], "opponentDisconnected");
        assert_eq!(value["scores"]["player1"], 5);
    }

    #[test]
    fn test_team_size_rules() {
        let mut settings = GameSettings::default();
        assert_eq!(settings.team_size(Side::Left), 1);

        settings.game_mode = GameMode::Arcade;
        settings.team1_player_count = Some(3);
        settings.team2_player_count = Some(9);
        assert_eq!(settings.team_size(Side::Left), 3);
        assert_eq!(settings.team_size(Side::Right), MAX_TEAM_SIZE);

        settings.team1_players = Some(vec![TeamPlayer::default(), TeamPlayer::default()]);
        assert_eq!(settings.team_size(Side::Left), 2);
    }

    #[test]
    fn test_scores_add_point() {
        let mut scores = Scores::default();
        assert_eq!(scores.add_point(Side::Right), 1);
        assert_eq!(scores.add_point(Side::Right), 2);
        assert_eq!(scores.get(Side::Left), 0);
        assert_eq!(scores.get(Side::Right), 2);
    }

    #[test]
    fn test_speed_tiers() {
        assert!(SpeedTier::Slow.ball_speed() < SpeedTier::Medium.ball_speed());
        assert!(SpeedTier::Medium.ball_speed() < SpeedTier::Fast.ball_speed());
        assert!(SpeedTier::Slow.paddle_step() < SpeedTier::Fast.paddle_step());
    }
}
