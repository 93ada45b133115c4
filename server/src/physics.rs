//! Fixed-step physics for the ball, paddles and powerup.
//!
//! Everything here is in field pixels and per-tick units; nothing reads the
//! clock except through the `now` arguments, so a match can be stepped
//! deterministically in tests.

use crate::utils::{random_duration, random_sign};
use rand::Rng;
use shared::{
    BallState, Direction, PaddleState, PowerupState, Side, BALL_RADIUS, FIELD_CENTER_X,
    FIELD_CENTER_Y, FIELD_HEIGHT, FIELD_WIDTH, LEFT_PADDLE_X, PADDLE_BOTTOM_BUFFER, PADDLE_HEIGHT,
    PADDLE_WIDTH, POWERUP_RADIUS, RIGHT_PADDLE_X,
};
use std::f32::consts::{FRAC_PI_2, PI};
use tokio::time::{Duration, Instant};

/// Extra slack above and below a paddle when accepting a swept hit.
pub const HIT_TOLERANCE: f32 = 8.0;
/// Distance the ball is pushed out of the paddle face after a hit.
pub const SNAP_OFFSET: f32 = 1.0;
pub const ACCELERATION_FACTOR: f32 = 1.10;
pub const MAX_SPEED_MULTIPLIER: f32 = 2.0;
/// 75 degrees; the ball can never be sent back toward the paddle's own goal.
pub const MAX_BOUNCE_ANGLE: f32 = 5.0 * PI / 12.0;
/// Radians of extra deflection per pixel/tick of paddle velocity.
pub const FLICK_FACTOR: f32 = 0.03;
pub const PADDLE_VELOCITY_DECAY: f32 = 0.85;
const PADDLE_VELOCITY_EPSILON: f32 = 0.1;

pub const POWERUP_GROWTH: f32 = 1.5;
pub const POWERUP_DURATION: Duration = Duration::from_secs(10);
pub const POWERUP_SPAWN_MIN: Duration = Duration::from_secs(5);
pub const POWERUP_SPAWN_MAX: Duration = Duration::from_secs(15);
const POWERUP_BAND_X: (f32, f32) = (350.0, 450.0);
const POWERUP_BAND_Y: (f32, f32) = (100.0, 500.0);

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    ///Positive direction is down the field.
    pub y: f32,
}

impl Vector2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        Vector2::new(self.x - other.x, self.y - other.y).magnitude()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub position: Vector2,
    pub velocity: Vector2,
    /// Held still during the countdown and the post-score freeze.
    pub frozen: bool,
    pub last_hitter: Option<Side>,
}

impl Default for Ball {
    fn default() -> Self {
        Self {
            position: Vector2::new(FIELD_CENTER_X, FIELD_CENTER_Y),
            velocity: Vector2::default(),
            frozen: true,
            last_hitter: None,
        }
    }
}

impl Ball {
    pub fn speed(&self) -> f32 {
        self.velocity.magnitude()
    }

    /// Returns the ball to the centre spot, frozen, with no hitter recorded.
    pub fn recenter(&mut self) {
        self.position = Vector2::new(FIELD_CENTER_X, FIELD_CENTER_Y);
        self.frozen = true;
        self.last_hitter = None;
    }

    /// Sets a fresh serve toward `toward` at the base speed with a random vertical component.
    pub fn serve<R: Rng>(&mut self, toward: Side, base_speed: f32, rng: &mut R) {
        let dx = match toward {
            Side::Left => -base_speed,
            Side::Right => base_speed,
        };
        let dy = (rng.gen::<f32>() - 0.5) * base_speed;
        self.velocity = Vector2::new(dx, dy);
    }

    /// Serve in a random horizontal direction, used for the opening serve.
    pub fn serve_random<R: Rng>(&mut self, base_speed: f32, rng: &mut R) {
        let toward = if random_sign(rng) > 0.0 {
            Side::Right
        } else {
            Side::Left
        };
        self.serve(toward, base_speed, rng);
    }

    /// Side whose goal the ball is travelling toward, if any.
    pub fn heading(&self) -> Option<Side> {
        if self.velocity.x < 0.0 {
            Some(Side::Left)
        } else if self.velocity.x > 0.0 {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn state(&self) -> BallState {
        BallState {
            x: self.position.x,
            y: self.position.y,
            dx: self.velocity.x,
            dy: self.velocity.y,
            frozen: self.frozen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    Human,
    Ai,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paddle {
    pub side: Side,
    pub x: f32,
    /// Top edge.
    pub y: f32,
    pub height: f32,
    pub original_height: f32,
    /// Signed pixels per tick, fed into the flick deflection.
    pub velocity: f32,
    pub powerup_expires_at: Option<Instant>,
    pub controller: Controller,
    pub last_miss_at: Option<Instant>,
    /// Offset the AI is currently applying to deliberately miss.
    pub miss_offset: f32,
}

impl Paddle {
    pub fn new(side: Side, y: f32, controller: Controller) -> Self {
        let x = match side {
            Side::Left => LEFT_PADDLE_X,
            Side::Right => RIGHT_PADDLE_X,
        };
        let mut paddle = Self {
            side,
            x,
            y,
            height: PADDLE_HEIGHT,
            original_height: PADDLE_HEIGHT,
            velocity: 0.0,
            powerup_expires_at: None,
            controller,
            last_miss_at: None,
            miss_offset: 0.0,
        };
        paddle.clamp();
        paddle
    }

    pub fn is_ai(&self) -> bool {
        self.controller == Controller::Ai
    }

    pub fn max_y(&self) -> f32 {
        FIELD_HEIGHT - self.height - PADDLE_BOTTOM_BUFFER
    }

    pub fn center(&self) -> f32 {
        self.y + self.height / 2.0
    }

    /// The face the ball collides with: right face for left paddles, left face for right.
    pub fn collision_plane(&self) -> f32 {
        match self.side {
            Side::Left => self.x + PADDLE_WIDTH,
            Side::Right => self.x - PADDLE_WIDTH,
        }
    }

    pub fn clamp(&mut self) {
        self.y = self.y.clamp(0.0, self.max_y().max(0.0));
    }

    /// Moves by `dy`, clamped to the field. A move fully blocked by a bound
    /// leaves `velocity` untouched. Returns whether the paddle moved.
    pub fn shift(&mut self, dy: f32) -> bool {
        let target = (self.y + dy).clamp(0.0, self.max_y().max(0.0));
        if (target - self.y).abs() < f32::EPSILON {
            return false;
        }
        self.y = target;
        self.velocity = dy;
        true
    }

    pub fn step(&mut self, direction: Direction, distance: f32) -> bool {
        match direction {
            Direction::Up => self.shift(-distance),
            Direction::Down => self.shift(distance),
        }
    }

    /// Key release: the paddle is genuinely stationary.
    pub fn stop(&mut self) {
        self.velocity = 0.0;
    }

    pub fn decay_velocity(&mut self) {
        self.velocity *= PADDLE_VELOCITY_DECAY;
        if self.velocity.abs() < PADDLE_VELOCITY_EPSILON {
            self.velocity = 0.0;
        }
    }

    /// Grows to the powerup height until `until`, kept fully on-screen.
    pub fn grow(&mut self, until: Instant) {
        self.height = self.original_height * POWERUP_GROWTH;
        self.powerup_expires_at = Some(until);
        self.clamp();
    }

    /// Reverts the powerup effect once expired. Returns true when it reverted.
    pub fn expire_growth(&mut self, now: Instant) -> bool {
        match self.powerup_expires_at {
            Some(expires_at) if now >= expires_at => {
                self.height = self.original_height;
                self.powerup_expires_at = None;
                self.clamp();
                true
            }
            _ => false,
        }
    }

    pub fn state(&self) -> PaddleState {
        PaddleState {
            x: self.x,
            y: self.y,
            height: self.height,
        }
    }
}

/// Paddles of both sides. Co-op layouts carry exactly one per side.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddleLayout {
    pub left: Vec<Paddle>,
    pub right: Vec<Paddle>,
    pub team: bool,
}

impl PaddleLayout {
    pub fn single(left: Controller, right: Controller) -> Self {
        let y = FIELD_CENTER_Y - PADDLE_HEIGHT / 2.0;
        Self {
            left: vec![Paddle::new(Side::Left, y, left)],
            right: vec![Paddle::new(Side::Right, y, right)],
            team: false,
        }
    }

    /// Spreads each roster evenly down its side of the field.
    pub fn teams(left: &[Controller], right: &[Controller]) -> Self {
        Self {
            left: Self::spread(Side::Left, left),
            right: Self::spread(Side::Right, right),
            team: true,
        }
    }

    fn spread(side: Side, controllers: &[Controller]) -> Vec<Paddle> {
        let slots = controllers.len() as f32 + 1.0;
        controllers
            .iter()
            .enumerate()
            .map(|(i, controller)| {
                let center = FIELD_HEIGHT / slots * (i as f32 + 1.0);
                Paddle::new(side, center - PADDLE_HEIGHT / 2.0, *controller)
            })
            .collect()
    }

    pub fn side(&self, side: Side) -> &[Paddle] {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut [Paddle] {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn get_mut(&mut self, side: Side, index: usize) -> Option<&mut Paddle> {
        self.side_mut(side).get_mut(index)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Paddle> {
        self.left.iter_mut().chain(self.right.iter_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Paddle> {
        self.left.iter().chain(self.right.iter())
    }

    pub fn grow_side(&mut self, side: Side, until: Instant) {
        for paddle in self.side_mut(side) {
            paddle.grow(until);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Powerup {
    pub position: Vector2,
    pub active: bool,
    pub next_spawn_at: Instant,
}

impl Powerup {
    pub fn scheduled<R: Rng>(now: Instant, rng: &mut R) -> Self {
        Self {
            position: Vector2::new(FIELD_CENTER_X, FIELD_CENTER_Y),
            active: false,
            next_spawn_at: now + random_duration(rng, POWERUP_SPAWN_MIN, POWERUP_SPAWN_MAX),
        }
    }

    /// Activates at a random point of the middle band once the spawn time passes.
    pub fn try_spawn<R: Rng>(&mut self, now: Instant, rng: &mut R) -> bool {
        if self.active || now < self.next_spawn_at {
            return false;
        }
        self.position = Vector2::new(
            rng.gen_range(POWERUP_BAND_X.0..=POWERUP_BAND_X.1),
            rng.gen_range(POWERUP_BAND_Y.0..=POWERUP_BAND_Y.1),
        );
        self.active = true;
        true
    }

    pub fn overlaps(&self, ball: &Ball) -> bool {
        self.active && self.position.distance(&ball.position) < BALL_RADIUS + POWERUP_RADIUS
    }

    /// Deactivates and schedules the next spawn.
    pub fn consume<R: Rng>(&mut self, now: Instant, rng: &mut R) {
        self.active = false;
        self.next_spawn_at = now + random_duration(rng, POWERUP_SPAWN_MIN, POWERUP_SPAWN_MAX);
    }

    pub fn state(&self) -> Option<PowerupState> {
        self.active.then(|| PowerupState {
            x: self.position.x,
            y: self.position.y,
            active: true,
            radius: POWERUP_RADIUS,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Moved,
    PaddleHit(Side),
    /// The side that scored.
    Scored(Side),
}

/// Outgoing angle for a hit at `hit_pos` (0 = top edge, 1 = bottom edge) with
/// the paddle moving at `paddle_velocity`. Zero is straight across the field.
pub fn bounce_angle(hit_pos: f32, paddle_velocity: f32) -> f32 {
    let base = (hit_pos.clamp(0.0, 1.0) - 0.5) * FRAC_PI_2;
    (base + paddle_velocity * FLICK_FACTOR).clamp(-MAX_BOUNCE_ANGLE, MAX_BOUNCE_ANGLE)
}

/// Hit position that produces `angle` with a stationary paddle.
pub fn hit_position_for_angle(angle: f32) -> f32 {
    (angle / FRAC_PI_2 + 0.5).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsEngine {
    pub base_speed: f32,
    pub accelerate_on_hit: bool,
}

impl PhysicsEngine {
    pub fn new(base_speed: f32, accelerate_on_hit: bool) -> Self {
        Self {
            base_speed,
            accelerate_on_hit,
        }
    }

    /// Advances the ball one tick: integrate, bounce off walls, sweep paddles, detect goals.
    pub fn step_ball(&self, ball: &mut Ball, paddles: &PaddleLayout) -> StepOutcome {
        if ball.frozen {
            return StepOutcome::Moved;
        }

        let previous = ball.position;
        ball.position = ball.position.add(&ball.velocity);

        if ball.position.y <= 0.0 {
            ball.position.y = 0.0;
            ball.velocity.y = ball.velocity.y.abs();
        } else if ball.position.y >= FIELD_HEIGHT {
            ball.position.y = FIELD_HEIGHT;
            ball.velocity.y = -ball.velocity.y.abs();
        }

        if let Some(side) = ball.heading() {
            for paddle in paddles.side(side) {
                if self.sweep(ball, previous, paddle) {
                    return StepOutcome::PaddleHit(side);
                }
            }
        }

        if ball.position.x < 0.0 {
            StepOutcome::Scored(Side::Right)
        } else if ball.position.x > FIELD_WIDTH {
            StepOutcome::Scored(Side::Left)
        } else {
            StepOutcome::Moved
        }
    }

    /// Checks whether the segment `previous -> ball.position` crossed the
    /// paddle's face within its vertical reach, and deflects the ball if so.
    fn sweep(&self, ball: &mut Ball, previous: Vector2, paddle: &Paddle) -> bool {
        let plane = paddle.collision_plane();
        let crossed = match paddle.side {
            Side::Left => previous.x >= plane && ball.position.x <= plane,
            Side::Right => previous.x <= plane && ball.position.x >= plane,
        };
        if !crossed {
            return false;
        }

        let travel = ball.position.x - previous.x;
        let t = if travel.abs() > f32::EPSILON {
            (plane - previous.x) / travel
        } else {
            0.0
        };
        let cross_y = previous.y + t * (ball.position.y - previous.y);
        if cross_y < paddle.y - HIT_TOLERANCE || cross_y > paddle.y + paddle.height + HIT_TOLERANCE
        {
            return false;
        }

        ball.position.x = match paddle.side {
            Side::Left => plane + SNAP_OFFSET,
            Side::Right => plane - SNAP_OFFSET,
        };
        ball.position.y = cross_y.clamp(0.0, FIELD_HEIGHT);
        ball.last_hitter = Some(paddle.side);
        self.deflect(ball, paddle, cross_y);
        true
    }

    fn deflect(&self, ball: &mut Ball, paddle: &Paddle, cross_y: f32) {
        let hit_pos = (cross_y - paddle.y) / paddle.height;
        let angle = bounce_angle(hit_pos, paddle.velocity);

        let mut speed = ball.speed();
        if self.accelerate_on_hit {
            speed = (speed * ACCELERATION_FACTOR).min(self.base_speed * MAX_SPEED_MULTIPLIER);
        }

        // Only the horizontal component is mirrored: a hit below the centre
        // sends the ball down off either paddle.
        let dx = speed * angle.cos();
        ball.velocity = Vector2::new(
            match paddle.side {
                Side::Left => dx,
                Side::Right => -dx,
            },
            speed * angle.sin(),
        );
    }
}
