//! Authoritative state of a single match.
//!
//! A `Match` is plain data driven by an external clock: the runner calls
//! [`Match::tick`] at the fixed rate and forwards player commands. Nothing in
//! here touches the network or the store.

use crate::ai::AiController;
use crate::physics::{
    Ball, Controller, Paddle, PaddleLayout, PhysicsEngine, Powerup, StepOutcome, POWERUP_DURATION,
};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    Direction, EndReason, GameSettings, KeyInput, MovePaddle, PaddleSet, Phase,
    PlayerInfo, Scores, ServerMessage, Side, Snapshot, StartPlayers, BOT_USERNAME, BOT_USER_ID,
    COUNTDOWN_START,
};
use tokio::time::{Duration, Instant};

pub type MatchId = u64;

pub const COUNTDOWN_STEP: Duration = Duration::from_secs(1);
pub const SCORE_FREEZE: Duration = Duration::from_secs(1);
/// Seat driven by the owning connection when two local players share it.
pub const COOP_HUMAN_SIDE: Side = Side::Left;
pub const DEFAULT_PADDLE_INDEX: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerKind {
    Human(u64),
    Bot,
    /// Second player on the same device as the opposing seat.
    LocalSeat(u64),
}

impl PlayerKind {
    pub fn wire_id(&self) -> u64 {
        match self {
            PlayerKind::Human(id) | PlayerKind::LocalSeat(id) => *id,
            PlayerKind::Bot => BOT_USER_ID,
        }
    }

    pub fn user_id(&self) -> Option<u64> {
        match self {
            PlayerKind::Human(id) | PlayerKind::LocalSeat(id) => Some(*id),
            PlayerKind::Bot => None,
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, PlayerKind::Bot)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Seat {
    pub kind: PlayerKind,
    pub username: String,
}

impl Seat {
    pub fn human(user_id: u64, username: impl Into<String>) -> Self {
        Self {
            kind: PlayerKind::Human(user_id),
            username: username.into(),
        }
    }

    pub fn bot() -> Self {
        Self {
            kind: PlayerKind::Bot,
            username: BOT_USERNAME.to_string(),
        }
    }

    pub fn local(user_id: u64, username: impl Into<String>) -> Self {
        Self {
            kind: PlayerKind::LocalSeat(user_id),
            username: username.into(),
        }
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            user_id: self.kind.wire_id(),
            username: self.username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    Countdown(u32),
    Started,
    PaddleHit(Side),
    Scored { side: Side, scores: Scores },
    /// The post-score freeze ended and the ball is live again.
    Served,
    PowerupSpawned,
    PowerupCollected { side: Option<Side> },
    PowerupExpired,
    Finished { winner: Side },
}

impl MatchEvent {
    /// Events that push a snapshot out immediately instead of waiting for the throttle.
    pub fn wants_snapshot(&self) -> bool {
        !matches!(self, MatchEvent::PaddleHit(_) | MatchEvent::PowerupExpired)
    }
}

/// A normalised paddle move, from either `movePaddle` or a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddleCommand {
    /// `None` is a key release.
    pub direction: Option<Direction>,
    pub player_id: Option<u64>,
    pub side: Option<Side>,
    pub paddle_index: Option<usize>,
}

impl PaddleCommand {
    pub fn from_move(request: &MovePaddle) -> Self {
        Self {
            direction: Some(request.direction),
            player_id: request.player_id,
            side: request.side,
            // Negative indices can never name a paddle.
            paddle_index: request
                .paddle_index
                .map(|index| usize::try_from(index).unwrap_or(usize::MAX)),
        }
    }

    pub fn from_key(input: &KeyInput) -> Option<Self> {
        let direction = input.direction()?;
        Some(Self {
            direction: input.pressed.then_some(direction),
            player_id: None,
            side: None,
            paddle_index: None,
        })
    }
}

pub struct Match {
    pub id: MatchId,
    pub left: Seat,
    pub right: Seat,
    pub settings: GameSettings,
    pub ball: Ball,
    pub paddles: PaddleLayout,
    pub scores: Scores,
    pub phase: Phase,
    pub countdown_value: u32,
    pub paused_at: Option<Instant>,
    pub powerup: Option<Powerup>,
    pub winner: Option<Side>,
    pub next_countdown_at: Instant,
    pub freeze_until: Option<Instant>,
    physics: PhysicsEngine,
    ai: AiController,
    rng: StdRng,
}

impl Match {
    pub fn new(id: MatchId, left: Seat, right: Seat, settings: GameSettings, now: Instant) -> Self {
        Self::with_rng(id, left, right, settings, now, StdRng::from_entropy())
    }

    pub fn with_rng(
        id: MatchId,
        left: Seat,
        right: Seat,
        settings: GameSettings,
        now: Instant,
        mut rng: StdRng,
    ) -> Self {
        let settings = settings.normalized();
        let paddles = Self::layout(&settings, &left, &right);
        let base_speed = settings.ball_speed.ball_speed();

        let mut ball = Ball::default();
        ball.serve_random(base_speed, &mut rng);
        let powerup = settings
            .powerups_enabled
            .then(|| Powerup::scheduled(now, &mut rng));

        Self {
            id,
            left,
            right,
            physics: PhysicsEngine::new(base_speed, settings.accelerate_on_hit),
            ai: AiController::new(settings.ai_difficulty),
            settings,
            ball,
            paddles,
            scores: Scores::default(),
            phase: Phase::Countdown,
            countdown_value: COUNTDOWN_START,
            paused_at: None,
            powerup,
            winner: None,
            next_countdown_at: now + COUNTDOWN_STEP,
            freeze_until: None,
            rng,
        }
    }

    fn layout(settings: &GameSettings, left: &Seat, right: &Seat) -> PaddleLayout {
        if !settings.game_mode.is_team() {
            return PaddleLayout::single(Self::seat_controller(left), Self::seat_controller(right));
        }
        PaddleLayout::teams(
            &Self::team_controllers(settings, Side::Left, left),
            &Self::team_controllers(settings, Side::Right, right),
        )
    }

    fn seat_controller(seat: &Seat) -> Controller {
        if seat.kind.is_bot() {
            Controller::Ai
        } else {
            Controller::Human
        }
    }

    /// Roster entries flagged `isBot` are AI. Without an entry, the default
    /// paddle belongs to the seat's player and the rest are AI teammates.
    fn team_controllers(settings: &GameSettings, side: Side, seat: &Seat) -> Vec<Controller> {
        let size = settings.team_size(side);
        if seat.kind.is_bot() {
            return vec![Controller::Ai; size];
        }
        let roster = settings.roster(side);
        (0..size)
            .map(|index| {
                let entry = roster
                    .iter()
                    .enumerate()
                    .find(|(position, player)| player.paddle_index.unwrap_or(*position) == index)
                    .map(|(_, player)| player);
                match entry {
                    Some(player) if player.is_bot => Controller::Ai,
                    Some(_) => Controller::Human,
                    None if index == DEFAULT_PADDLE_INDEX => Controller::Human,
                    None => Controller::Ai,
                }
            })
            .collect()
    }

    pub fn seat(&self, side: Side) -> &Seat {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Side of the seat held by `user_id`, checking the left seat first.
    pub fn side_of(&self, user_id: u64) -> Option<Side> {
        if self.left.kind.user_id() == Some(user_id) {
            Some(Side::Left)
        } else if self.right.kind.user_id() == Some(user_id) {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn winner_id(&self) -> Option<u64> {
        self.winner.map(|side| self.seat(side).kind.wire_id())
    }

    /// Advances the match to `now`. Returns what happened this tick.
    pub fn tick(&mut self, now: Instant) -> Vec<MatchEvent> {
        let mut events = Vec::new();
        if self.is_paused() {
            return events;
        }
        match self.phase {
            Phase::Countdown => self.advance_countdown(now, &mut events),
            Phase::Playing => self.advance_play(now, &mut events),
            Phase::Finished => {}
        }
        events
    }

    fn advance_countdown(&mut self, now: Instant, events: &mut Vec<MatchEvent>) {
        while self.phase == Phase::Countdown && now >= self.next_countdown_at {
            self.countdown_value = self.countdown_value.saturating_sub(1);
            self.next_countdown_at += COUNTDOWN_STEP;
            if self.countdown_value == 0 {
                self.phase = Phase::Playing;
                self.ball.frozen = false;
                info!("[match {}] countdown finished, ball in play", self.id);
                events.push(MatchEvent::Started);
            } else {
                events.push(MatchEvent::Countdown(self.countdown_value));
            }
        }
    }

    fn advance_play(&mut self, now: Instant, events: &mut Vec<MatchEvent>) {
        if let Some(until) = self.freeze_until {
            if now >= until {
                self.freeze_until = None;
                self.ball.frozen = false;
                events.push(MatchEvent::Served);
            }
        }

        self.ai.observe(&self.ball, &mut self.rng);
        for paddle in self.paddles.iter_mut().filter(|p| p.is_ai()) {
            self.ai
                .drive(paddle, &self.ball, self.powerup.as_ref(), now, &mut self.rng);
        }

        match self.physics.step_ball(&mut self.ball, &self.paddles) {
            StepOutcome::PaddleHit(side) => events.push(MatchEvent::PaddleHit(side)),
            StepOutcome::Scored(side) => self.score(side, now, events),
            StepOutcome::Moved => {}
        }

        if self.phase == Phase::Playing {
            self.update_powerup(now, events);
        }

        let mut expired = false;
        for paddle in self.paddles.iter_mut() {
            expired |= paddle.expire_growth(now);
            paddle.decay_velocity();
        }
        if expired {
            debug!("[match {}] powerup effect expired", self.id);
            events.push(MatchEvent::PowerupExpired);
        }
    }

    fn update_powerup(&mut self, now: Instant, events: &mut Vec<MatchEvent>) {
        let Some(powerup) = self.powerup.as_mut() else {
            return;
        };
        if powerup.try_spawn(now, &mut self.rng) {
            debug!(
                "[match {}] powerup spawned at ({:.0}, {:.0})",
                self.id, powerup.position.x, powerup.position.y
            );
            events.push(MatchEvent::PowerupSpawned);
        } else if !self.ball.frozen && powerup.overlaps(&self.ball) {
            let side = self.ball.last_hitter;
            powerup.consume(now, &mut self.rng);
            if let Some(side) = side {
                self.paddles.grow_side(side, now + POWERUP_DURATION);
            }
            debug!("[match {}] powerup collected by {:?}", self.id, side);
            events.push(MatchEvent::PowerupCollected { side });
        }
    }

    fn score(&mut self, side: Side, now: Instant, events: &mut Vec<MatchEvent>) {
        self.scores.add_point(side);
        info!(
            "[match {}] {} scores ({}-{})",
            self.id,
            side.seat_label(),
            self.scores.player1,
            self.scores.player2
        );
        events.push(MatchEvent::Scored {
            side,
            scores: self.scores,
        });

        if let Some(winner) = self.winner_by_score() {
            self.finish(winner, events);
            return;
        }

        self.ball.recenter();
        self.ai.reset_tracking();
        self.ball
            .serve(side, self.physics.base_speed, &mut self.rng);
        self.freeze_until = Some(now + SCORE_FREEZE);
    }

    /// Left wins when both sides have reached the target.
    fn winner_by_score(&self) -> Option<Side> {
        let target = self.settings.score_to_win;
        [Side::Left, Side::Right]
            .into_iter()
            .find(|side| self.scores.get(*side) >= target)
    }

    fn finish(&mut self, winner: Side, events: &mut Vec<MatchEvent>) {
        self.phase = Phase::Finished;
        self.winner = Some(winner);
        self.ball.frozen = true;
        self.freeze_until = None;
        info!(
            "[match {}] finished, {} wins {}-{}",
            self.id,
            winner.seat_label(),
            self.scores.player1,
            self.scores.player2
        );
        events.push(MatchEvent::Finished { winner });
    }

    /// Ends the match because `leaver` disconnected. Returns the remaining
    /// side, or `None` if the match had already finished.
    pub fn abandon(&mut self, leaver: Side) -> Option<Side> {
        if self.is_finished() {
            return None;
        }
        let remaining = leaver.opposite();
        self.phase = Phase::Finished;
        self.winner = Some(remaining);
        self.ball.frozen = true;
        self.paused_at = None;
        info!(
            "[match {}] {} left, match abandoned",
            self.id,
            leaver.seat_label()
        );
        Some(remaining)
    }

    /// Applies a pause request. `None` toggles. Returns the new paused state
    /// when it changed; pausing only applies while playing.
    pub fn set_paused(&mut self, requested: Option<bool>, now: Instant) -> Option<bool> {
        if self.phase != Phase::Playing {
            return None;
        }
        let pause = requested.unwrap_or(!self.is_paused());
        match (pause, self.paused_at) {
            (true, None) => {
                self.paused_at = Some(now);
                info!("[match {}] paused", self.id);
                Some(true)
            }
            (false, Some(since)) => {
                self.paused_at = None;
                self.shift_timers(now.saturating_duration_since(since));
                info!("[match {}] resumed", self.id);
                Some(false)
            }
            _ => None,
        }
    }

    fn shift_timers(&mut self, by: Duration) {
        if let Some(until) = self.freeze_until.as_mut() {
            *until += by;
        }
        self.next_countdown_at += by;
        if let Some(powerup) = self.powerup.as_mut() {
            powerup.next_spawn_at += by;
        }
        for paddle in self.paddles.iter_mut() {
            if let Some(expires_at) = paddle.powerup_expires_at.as_mut() {
                *expires_at += by;
            }
        }
    }

    /// Applies a paddle command from the connection seated on `sender`.
    /// Returns true when a paddle actually moved.
    pub fn move_paddle(&mut self, sender: Side, command: &PaddleCommand) -> bool {
        if self.is_finished() || self.is_paused() {
            return false;
        }
        let Some((side, index)) = self.resolve_paddle(sender, command) else {
            debug!("[match {}] move for unknown player ignored", self.id);
            return false;
        };
        if side != sender && !matches!(self.seat(side).kind, PlayerKind::LocalSeat(_)) {
            debug!(
                "[match {}] {} tried to move the opposing paddle",
                self.id,
                sender.seat_label()
            );
            return false;
        }

        let step = self.settings.paddle_speed.paddle_step();
        let Some(paddle) = self.paddles.get_mut(side, index) else {
            debug!("[match {}] paddle index {} out of range", self.id, index);
            return false;
        };
        if paddle.is_ai() {
            return false;
        }
        match command.direction {
            Some(direction) => paddle.step(direction, step),
            None => {
                paddle.stop();
                false
            }
        }
    }

    fn resolve_paddle(&self, sender: Side, command: &PaddleCommand) -> Option<(Side, usize)> {
        if let Some(side) = command.side {
            return Some((side, command.paddle_index.unwrap_or(DEFAULT_PADDLE_INDEX)));
        }
        let side = match command.player_id {
            Some(player_id) => self.side_of(player_id)?,
            None => sender,
        };
        let index = if self.paddles.team {
            command.paddle_index.unwrap_or(DEFAULT_PADDLE_INDEX)
        } else {
            DEFAULT_PADDLE_INDEX
        };
        Some((side, index))
    }

    pub fn snapshot(&self) -> Snapshot {
        let states = |paddles: &[Paddle]| paddles.iter().map(Paddle::state).collect::<Vec<_>>();
        let first = |paddles: &[Paddle]| paddles.first().map(Paddle::state).unwrap_or_default();

        Snapshot {
            ball: self.ball.state(),
            paddles: PaddleSet {
                player1: first(self.paddles.side(Side::Left)),
                player2: first(self.paddles.side(Side::Right)),
                team1: self.paddles.team.then(|| states(self.paddles.side(Side::Left))),
                team2: self.paddles.team.then(|| states(self.paddles.side(Side::Right))),
            },
            scores: self.scores,
            game_state: self.phase,
            countdown_value: (self.phase == Phase::Countdown).then_some(self.countdown_value),
            powerup: self.powerup.as_ref().and_then(Powerup::state),
            is_paused: self.is_paused(),
        }
    }

    pub fn start_message(&self) -> ServerMessage {
        ServerMessage::GameStart {
            game_id: self.id,
            players: StartPlayers {
                player1: self.left.info(),
                player2: self.right.info(),
            },
            game_settings: self.settings.clone(),
        }
    }

    pub fn end_message(&self, reason: Option<EndReason>) -> ServerMessage {
        ServerMessage::GameEnd {
            winner: self.winner_id().unwrap_or(BOT_USER_ID),
            scores: self.scores,
            game_id: self.id,
            reason,
        }
    }
}
