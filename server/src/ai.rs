//! Bot paddle controller.
//!
//! The controller only sees ball positions it has observed, never the ball's
//! velocity, and predicts the intercept by extrapolating the last two samples.

use crate::physics::{hit_position_for_angle, Ball, Paddle, Powerup, Vector2, MAX_BOUNCE_ANGLE};
use rand::Rng;
use shared::{Difficulty, Side, FIELD_CENTER_Y, FIELD_HEIGHT};
use std::f32::consts::FRAC_PI_4;
use tokio::time::{Duration, Instant};

/// Below this distance to its target the bot holds still.
pub const AI_DEAD_ZONE: f32 = 10.0;
/// Nudges each side's target so mirrored bots do not play identical lines.
pub const SIDE_BIAS: f32 = 3.0;
/// Horizontal motion per sample below which the ball is treated as stationary.
const MIN_TRACKED_DX: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AiProfile {
    pub move_speed: f32,
    /// Chance per tick of deciding to miss the incoming ball.
    pub miss_probability: f64,
    pub miss_cooldown: Duration,
    pub miss_offset: f32,
    pub aim_error: f32,
    /// Blend weight toward a trick-shot target, 0 is pure defence.
    pub shot_weight: f32,
}

impl AiProfile {
    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Easy => Self {
                move_speed: 4.0,
                miss_probability: 0.02,
                miss_cooldown: Duration::from_millis(1500),
                miss_offset: 80.0,
                aim_error: 35.0,
                shot_weight: 0.15,
            },
            Difficulty::Medium => Self {
                move_speed: 6.0,
                miss_probability: 0.01,
                miss_cooldown: Duration::from_millis(2500),
                miss_offset: 60.0,
                aim_error: 18.0,
                shot_weight: 0.35,
            },
            Difficulty::Hard => Self {
                move_speed: 9.0,
                miss_probability: 0.003,
                miss_cooldown: Duration::from_secs(4),
                miss_offset: 40.0,
                aim_error: 6.0,
                shot_weight: 0.6,
            },
        }
    }
}

/// Folds an unbounded y back into the field as if it bounced off both walls.
pub fn fold_into_field(y: f32) -> f32 {
    let period = 2.0 * FIELD_HEIGHT;
    let folded = y.rem_euclid(period);
    if folded > FIELD_HEIGHT {
        period - folded
    } else {
        folded
    }
}

#[derive(Debug, Clone)]
pub struct AiController {
    pub profile: AiProfile,
    previous: Option<Vector2>,
    latest: Option<Vector2>,
    heading: Option<Side>,
    aim_error: f32,
}

impl AiController {
    pub fn new(difficulty: Difficulty) -> Self {
        Self {
            profile: AiProfile::for_difficulty(difficulty),
            previous: None,
            latest: None,
            heading: None,
            aim_error: 0.0,
        }
    }

    /// Records the ball position for this tick. A new aim error is drawn
    /// whenever the ball changes horizontal direction.
    pub fn observe<R: Rng>(&mut self, ball: &Ball, rng: &mut R) {
        self.previous = self.latest;
        self.latest = Some(ball.position);

        let heading = ball.heading();
        if heading != self.heading {
            self.heading = heading;
            let margin = self.profile.aim_error;
            self.aim_error = if margin > 0.0 {
                rng.gen_range(-margin..=margin)
            } else {
                0.0
            };
        }
    }

    /// Clears tracking after the ball is re-centred so the jump is not read as motion.
    pub fn reset_tracking(&mut self) {
        self.previous = None;
        self.latest = None;
    }

    /// Predicted ball y when it reaches `plane_x`, from the last two samples.
    pub fn predict_y(&self, plane_x: f32) -> Option<f32> {
        let latest = self.latest?;
        let previous = match self.previous {
            Some(previous) => previous,
            None => return Some(latest.y),
        };

        let dx = latest.x - previous.x;
        if dx.abs() < MIN_TRACKED_DX {
            return Some(latest.y);
        }
        let dy = latest.y - previous.y;
        let ticks = (plane_x - latest.x) / dx;
        Some(fold_into_field(latest.y + dy * ticks))
    }

    /// Ticks until the ball reaches `plane_x`, if it is heading there.
    fn ticks_to_plane(&self, plane_x: f32) -> Option<f32> {
        let latest = self.latest?;
        let previous = self.previous?;
        let dx = latest.x - previous.x;
        if dx.abs() < MIN_TRACKED_DX {
            return None;
        }
        let ticks = (plane_x - latest.x) / dx;
        (ticks >= 0.0).then_some(ticks)
    }

    /// Moves one AI paddle toward its target for this tick. Returns whether it moved.
    pub fn drive<R: Rng>(
        &self,
        paddle: &mut Paddle,
        ball: &Ball,
        powerup: Option<&Powerup>,
        now: Instant,
        rng: &mut R,
    ) -> bool {
        let inbound = !ball.frozen && ball.heading() == Some(paddle.side);

        let target_y = if inbound {
            self.refresh_miss(paddle, now, rng);
            let plane = paddle.collision_plane();
            let predicted = self.predict_y(plane).unwrap_or(ball.position.y);
            let bias = match paddle.side {
                Side::Left => SIDE_BIAS,
                Side::Right => -SIDE_BIAS,
            };
            let defence =
                predicted - paddle.height / 2.0 + paddle.miss_offset + self.aim_error + bias;

            match powerup.and_then(|p| self.shot_target(paddle, predicted, p)) {
                Some(shot) => {
                    let weight = self.profile.shot_weight;
                    defence * (1.0 - weight) + shot * weight
                }
                None => defence,
            }
        } else {
            paddle.miss_offset = 0.0;
            FIELD_CENTER_Y - paddle.height / 2.0
        };

        let target_y = target_y.clamp(0.0, paddle.max_y().max(0.0));
        let delta = target_y - paddle.y;
        if delta.abs() <= AI_DEAD_ZONE {
            return false;
        }
        let speed = self.profile.move_speed;
        paddle.shift(delta.clamp(-speed, speed))
    }

    fn refresh_miss<R: Rng>(&self, paddle: &mut Paddle, now: Instant, rng: &mut R) {
        if paddle.miss_offset != 0.0 {
            return;
        }
        let cooled = match paddle.last_miss_at {
            Some(at) => now.duration_since(at) >= self.profile.miss_cooldown,
            None => true,
        };
        if cooled && rng.gen_bool(self.profile.miss_probability) {
            paddle.last_miss_at = Some(now);
            paddle.miss_offset = if rng.gen_bool(0.5) {
                self.profile.miss_offset
            } else {
                -self.profile.miss_offset
            };
        }
    }

    /// Paddle top that would send the ball at the powerup, if the shot is
    /// within the unflicked deflection range and the paddle can get there in time.
    fn shot_target(&self, paddle: &Paddle, impact_y: f32, powerup: &Powerup) -> Option<f32> {
        if !powerup.active {
            return None;
        }
        let plane = paddle.collision_plane();
        let run = (powerup.position.x - plane).abs();
        if run < f32::EPSILON {
            return None;
        }
        let angle = (powerup.position.y - impact_y).atan2(run);
        if angle.abs() > FRAC_PI_4.min(MAX_BOUNCE_ANGLE) {
            return None;
        }

        let hit_pos = hit_position_for_angle(angle);
        let target = (impact_y - hit_pos * paddle.height).clamp(0.0, paddle.max_y().max(0.0));
        let ticks = self.ticks_to_plane(plane)?;
        let reachable = (target - paddle.y).abs() <= self.profile.move_speed * ticks;
        reachable.then_some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Controller;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{PADDLE_BOTTOM_BUFFER, PADDLE_HEIGHT};

    fn ball_at(x: f32, y: f32, dx: f32, dy: f32) -> Ball {
        Ball {
            position: Vector2::new(x, y),
            velocity: Vector2::new(dx, dy),
            frozen: false,
            last_hitter: None,
        }
    }

    /// Controller with a deterministic profile: no misses, no aim error.
    fn steady_controller() -> AiController {
        let mut controller = AiController::new(Difficulty::Medium);
        controller.profile.miss_probability = 0.0;
        controller.profile.aim_error = 0.0;
        controller
    }

    fn observe_path(controller: &mut AiController, points: &[(f32, f32, f32, f32)]) {
        let mut rng = StdRng::seed_from_u64(1);
        for &(x, y, dx, dy) in points {
            controller.observe(&ball_at(x, y, dx, dy), &mut rng);
        }
    }

    #[test]
    fn test_fold_into_field() {
        assert_approx_eq!(fold_into_field(300.0), 300.0, 1e-4);
        assert_approx_eq!(fold_into_field(700.0), 500.0, 1e-4);
        assert_approx_eq!(fold_into_field(-100.0), 100.0, 1e-4);
        assert_approx_eq!(fold_into_field(1300.0), 100.0, 1e-4);
        assert_approx_eq!(fold_into_field(-700.0), 500.0, 1e-4);
    }

    #[test]
    fn test_prediction_reflects_off_walls() {
        let mut controller = steady_controller();
        observe_path(
            &mut controller,
            &[(400.0, 500.0, 10.0, 10.0), (410.0, 510.0, 10.0, 10.0)],
        );

        // 33 ticks to x = 740, y would be 840 -> folds to 360
        assert_approx_eq!(controller.predict_y(740.0).unwrap(), 360.0, 1e-3);
    }

    #[test]
    fn test_prediction_without_horizontal_motion_returns_current_y() {
        let mut controller = steady_controller();
        observe_path(
            &mut controller,
            &[(400.0, 200.0, 0.0, 3.0), (400.2, 203.0, 0.0, 3.0)],
        );
        assert_approx_eq!(controller.predict_y(740.0).unwrap(), 203.0, 1e-4);

        let empty = steady_controller();
        assert_eq!(empty.predict_y(740.0), None);
    }

    #[test]
    fn test_moves_toward_prediction_at_most_move_speed() {
        let mut controller = steady_controller();
        observe_path(
            &mut controller,
            &[(400.0, 100.0, 8.0, 0.0), (408.0, 100.0, 8.0, 0.0)],
        );
        let mut rng = StdRng::seed_from_u64(2);
        let mut paddle = Paddle::new(Side::Right, 250.0, Controller::Ai);
        let ball = ball_at(408.0, 100.0, 8.0, 0.0);

        assert!(controller.drive(&mut paddle, &ball, None, Instant::now(), &mut rng));
        assert_approx_eq!(paddle.y, 250.0 - controller.profile.move_speed, 1e-4);
    }

    #[test]
    fn test_dead_zone_prevents_jitter() {
        let mut controller = steady_controller();
        observe_path(
            &mut controller,
            &[(400.0, 300.0, 8.0, 0.0), (408.0, 300.0, 8.0, 0.0)],
        );
        let mut rng = StdRng::seed_from_u64(2);
        // target = 300 - 50 - 3 = 247, within the dead zone of 250
        let mut paddle = Paddle::new(Side::Right, 250.0, Controller::Ai);
        let ball = ball_at(408.0, 300.0, 8.0, 0.0);

        assert!(!controller.drive(&mut paddle, &ball, None, Instant::now(), &mut rng));
        assert_eq!(paddle.y, 250.0);
    }

    #[test]
    fn test_drifts_to_centre_when_ball_moves_away() {
        let mut controller = steady_controller();
        observe_path(
            &mut controller,
            &[(400.0, 50.0, -8.0, 0.0), (392.0, 50.0, -8.0, 0.0)],
        );
        let mut rng = StdRng::seed_from_u64(2);
        let mut paddle = Paddle::new(Side::Right, 0.0, Controller::Ai);
        paddle.miss_offset = 60.0;
        let ball = ball_at(392.0, 50.0, -8.0, 0.0);

        assert!(controller.drive(&mut paddle, &ball, None, Instant::now(), &mut rng));
        assert!(paddle.y > 0.0);
        assert_eq!(paddle.miss_offset, 0.0);
    }

    #[test]
    fn test_never_leaves_field() {
        let mut controller = steady_controller();
        controller.profile.move_speed = 1_000.0;
        observe_path(
            &mut controller,
            &[(400.0, 590.0, 8.0, 0.0), (408.0, 590.0, 8.0, 0.0)],
        );
        let mut rng = StdRng::seed_from_u64(2);
        let mut paddle = Paddle::new(Side::Right, 0.0, Controller::Ai);
        let ball = ball_at(408.0, 590.0, 8.0, 0.0);

        controller.drive(&mut paddle, &ball, None, Instant::now(), &mut rng);
        assert_eq!(paddle.y, FIELD_HEIGHT - PADDLE_HEIGHT - PADDLE_BOTTOM_BUFFER);
    }

    #[test]
    fn test_miss_respects_cooldown() {
        let mut controller = steady_controller();
        controller.profile.miss_probability = 1.0;
        let mut rng = StdRng::seed_from_u64(4);
        let now = Instant::now();
        let mut paddle = Paddle::new(Side::Right, 250.0, Controller::Ai);

        controller.refresh_miss(&mut paddle, now, &mut rng);
        assert_eq!(paddle.last_miss_at, Some(now));
        assert_eq!(paddle.miss_offset.abs(), controller.profile.miss_offset);

        paddle.miss_offset = 0.0;
        let soon = now + Duration::from_millis(100);
        controller.refresh_miss(&mut paddle, soon, &mut rng);
        assert_eq!(paddle.last_miss_at, Some(now));
        assert_eq!(paddle.miss_offset, 0.0);

        let later = now + controller.profile.miss_cooldown;
        controller.refresh_miss(&mut paddle, later, &mut rng);
        assert_eq!(paddle.last_miss_at, Some(later));
    }

    #[test]
    fn test_shot_target_aims_at_powerup() {
        let mut controller = steady_controller();
        observe_path(
            &mut controller,
            &[(400.0, 300.0, 8.0, 0.0), (408.0, 300.0, 8.0, 0.0)],
        );
        let paddle = Paddle::new(Side::Right, 250.0, Controller::Ai);
        let powerup = Powerup {
            position: Vector2::new(400.0, 300.0),
            active: true,
            next_spawn_at: Instant::now(),
        };

        // Straight back across the field: a centre hit
        let target = controller.shot_target(&paddle, 300.0, &powerup).unwrap();
        assert_approx_eq!(target, 250.0, 1e-3);

        let inactive = Powerup {
            active: false,
            ..powerup.clone()
        };
        assert_eq!(controller.shot_target(&paddle, 300.0, &inactive), None);

        let steep = Powerup {
            position: Vector2::new(700.0, 0.0),
            ..powerup
        };
        assert_eq!(controller.shot_target(&paddle, 300.0, &steep), None);
    }

    #[test]
    fn test_profiles_scale_with_difficulty() {
        let easy = AiProfile::for_difficulty(Difficulty::Easy);
        let hard = AiProfile::for_difficulty(Difficulty::Hard);
        assert!(hard.move_speed > easy.move_speed);
        assert!(hard.miss_probability < easy.miss_probability);
        assert!(hard.aim_error < easy.aim_error);
        assert!(hard.shot_weight > easy.shot_weight);
        assert!(hard.miss_cooldown > easy.miss_cooldown);
    }
}
