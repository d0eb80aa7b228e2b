//! Ball and paddle physics on the normalised field
//!
//! The field spans `[0, 1] x [0, 1]`. Paddle `y` is the top edge of the paddle.

use rand::Rng;

use crate::ws::protocol::Side;

pub const PADDLE_HEIGHT: f32 = 0.2;
pub const PADDLE_WIDTH: f32 = 0.02;
/// Gap between the field edge and the outer face of a paddle
pub const PADDLE_MARGIN: f32 = 0.03;
/// Paddle speed in field units per second
pub const PADDLE_SPEED: f32 = 1.2;
pub const BALL_RADIUS: f32 = 0.015;
pub const SERVE_SPEED: f32 = 0.5;
pub const SERVE_MAX_VY: f32 = 0.25;
/// Speed multiplier applied on every paddle hit
pub const SPEED_UP: f32 = 1.05;
pub const MAX_BALL_SPEED: f32 = 1.5;
pub const MAX_BOUNCE_ANGLE: f32 = std::f32::consts::FRAC_PI_4;
pub const FIELD_WIDTH: f32 = 1.0;
/// Longest distance the ball may travel in one sub-step; narrower than a paddle hit window
pub const MAX_STEP_DISTANCE: f32 = 2.0 * BALL_RADIUS;

/// Ball position and velocity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

impl Ball {
    /// Centre the ball and send it horizontally in `direction` (sign only)
    pub fn serve<R: Rng + ?Sized>(direction: f32, rng: &mut R) -> Self {
        Self {
            x: 0.5,
            y: 0.5,
            vx: SERVE_SPEED * direction.signum(),
            vy: rng.gen_range(-SERVE_MAX_VY..=SERVE_MAX_VY),
        }
    }

    pub fn speed(&self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }
}

/// One paddle; `x` is fixed per side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paddle {
    pub side: Side,
    pub x: f32,
    pub y: f32,
}

impl Paddle {
    pub fn new(side: Side) -> Self {
        let x = match side {
            Side::Left => PADDLE_MARGIN,
            Side::Right => FIELD_WIDTH - PADDLE_MARGIN - PADDLE_WIDTH,
        };
        Self {
            side,
            x,
            y: (1.0 - PADDLE_HEIGHT) / 2.0,
        }
    }

    /// Move by `dy`, keeping the paddle inside the field
    pub fn shift(&mut self, dy: f32) {
        self.y = (self.y + dy).clamp(0.0, 1.0 - PADDLE_HEIGHT);
    }

    fn center_y(&self) -> f32 {
        self.y + PADDLE_HEIGHT / 2.0
    }

    /// Bounding-box test against the face the ball is approaching
    fn is_hit_by(&self, ball: &Ball) -> bool {
        let within_span =
            ball.y + BALL_RADIUS >= self.y && ball.y - BALL_RADIUS <= self.y + PADDLE_HEIGHT;
        if !within_span {
            return false;
        }
        match self.side {
            Side::Left => {
                ball.vx < 0.0
                    && ball.x - BALL_RADIUS <= self.x + PADDLE_WIDTH
                    && ball.x + BALL_RADIUS >= self.x
            }
            Side::Right => {
                ball.vx > 0.0
                    && ball.x + BALL_RADIUS >= self.x
                    && ball.x - BALL_RADIUS <= self.x + PADDLE_WIDTH
            }
        }
    }
}

/// Outcome of one physics step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// The ball bounced off a paddle
    PaddleHit(Side),
    /// The ball left the field; the given side scores
    Scored(Side),
}

/// Physics system for advancing the ball
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance `ball` by `dt` seconds, resolving walls, paddles and scoring.
    ///
    /// Either paddle may be absent. On a score the ball is re-served from the
    /// centre with its horizontal direction reversed.
    pub fn step<R: Rng + ?Sized>(
        ball: &mut Ball,
        left: Option<&Paddle>,
        right: Option<&Paddle>,
        dt: f32,
        rng: &mut R,
    ) -> Option<StepEvent> {
        ball.x += ball.vx * dt;
        ball.y += ball.vy * dt;

        Self::reflect_walls(ball);

        let mut event = None;
        for paddle in [left, right].into_iter().flatten() {
            if paddle.is_hit_by(ball) {
                Self::bounce(ball, paddle);
                event = Some(StepEvent::PaddleHit(paddle.side));
                break;
            }
        }

        if ball.x < 0.0 {
            *ball = Ball::serve(-ball.vx, rng);
            return Some(StepEvent::Scored(Side::Right));
        }
        if ball.x > FIELD_WIDTH {
            *ball = Ball::serve(-ball.vx, rng);
            return Some(StepEvent::Scored(Side::Left));
        }

        event
    }

    /// Advance by `dt`, split into sub-steps short enough that the ball cannot
    /// skip over a paddle. Stops at the first score.
    pub fn advance<R: Rng + ?Sized>(
        ball: &mut Ball,
        left: Option<&Paddle>,
        right: Option<&Paddle>,
        dt: f32,
        rng: &mut R,
    ) -> Option<StepEvent> {
        let substeps = (ball.speed() * dt / MAX_STEP_DISTANCE).ceil().max(1.0) as u32;
        let sub_dt = dt / substeps as f32;

        let mut last = None;
        for _ in 0..substeps {
            match Self::step(ball, left, right, sub_dt, rng) {
                Some(StepEvent::Scored(side)) => return Some(StepEvent::Scored(side)),
                Some(event) => last = Some(event),
                None => {}
            }
        }
        last
    }

    fn reflect_walls(ball: &mut Ball) {
        if ball.y < 0.0 {
            ball.y = 0.0;
            ball.vy = ball.vy.abs();
        } else if ball.y > 1.0 {
            ball.y = 1.0;
            ball.vy = -ball.vy.abs();
        }
    }

    fn bounce(ball: &mut Ball, paddle: &Paddle) {
        // Push the ball back outside the paddle face
        let direction = match paddle.side {
            Side::Left => {
                ball.x = paddle.x + PADDLE_WIDTH + BALL_RADIUS;
                1.0
            }
            Side::Right => {
                ball.x = paddle.x - BALL_RADIUS;
                -1.0
            }
        };

        let offset = ((ball.y - paddle.center_y()) / (PADDLE_HEIGHT / 2.0)).clamp(-1.0, 1.0);
        let speed = (ball.speed() * SPEED_UP).min(MAX_BALL_SPEED);
        let angle = offset * MAX_BOUNCE_ANGLE;

        ball.vx = speed * angle.cos() * direction;
        ball.vy = speed * angle.sin();
    }
}
