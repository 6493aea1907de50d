//! Actor advancers.
//!
//! An `Advancer` owns a working copy of one actor and steps it forward in
//! time. The server advances every actor this way; clients use one only for
//! the pawn they control, so its motion can be predicted without waiting for
//! the server.
//!
//! Determinism notes:
//! - Motion is integrated in substeps of at most `max_substep` seconds,
//!   whatever the caller's frame rate.
//! - Stale timestamps are absorbed as no-ops; the clock never goes back.

use std::sync::Arc;

use tracing::debug;

use crate::{
    actor::{Activity, Actor, ActorKind},
    config::AdvancerConfig,
    environment::Environment,
    input::{InputFlags, InputFrame},
    shape::TransformedShape,
};

/// How an advancer steps its actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvancerKind {
    /// Clock only.
    Static,
    /// Substepped movement with collision correction.
    Mobile,
    /// Mobile plus activity lifecycle and input frames.
    Pawn,
}

impl From<ActorKind> for AdvancerKind {
    fn from(kind: ActorKind) -> Self {
        match kind {
            ActorKind::Static => AdvancerKind::Static,
            ActorKind::Mobile => AdvancerKind::Mobile,
            ActorKind::Pawn => AdvancerKind::Pawn,
        }
    }
}

/// Steps one actor forward in time.
pub struct Advancer {
    env: Arc<dyn Environment>,
    cfg: AdvancerConfig,
    kind: AdvancerKind,
    actor: Actor,
    valid_at: i64,
    shape: TransformedShape,
    pending: Option<InputFrame>,
}

impl Advancer {
    /// Creates an advancer for `actor`, valid at `timestamp`.
    pub fn new(
        env: Arc<dyn Environment>,
        actor: Actor,
        timestamp: i64,
        cfg: AdvancerConfig,
    ) -> Self {
        let shape = actor
            .config()
            .shape
            .transform(actor.translation(), actor.rotation());
        let mut advancer = Self {
            env,
            cfg,
            kind: actor.kind().into(),
            actor,
            valid_at: timestamp,
            shape,
            pending: None,
        };
        advancer.start(timestamp);
        advancer
    }

    /// Resets to a new actor state valid at `timestamp`.
    pub fn init(&mut self, actor: Actor, timestamp: i64) {
        self.kind = actor.kind().into();
        self.actor = actor;
        self.valid_at = timestamp;
        self.pending = None;
        self.update_shape();
        self.start(timestamp);
    }

    /// Advances to `timestamp`. Does nothing unless `timestamp` is later
    /// than the current one.
    pub fn advance(&mut self, timestamp: i64) {
        if timestamp <= self.valid_at {
            return;
        }
        let start = self.valid_at;
        self.valid_at = timestamp;
        self.step(start, timestamp);
    }

    /// Queues an input frame and advances to its timestamp. The frame takes
    /// effect at the end of the next step that runs.
    pub fn advance_input(&mut self, frame: InputFrame) {
        if self.kind == AdvancerKind::Pawn {
            self.pending = Some(frame);
        }
        self.advance(frame.timestamp);
    }

    /// Moves the clock forward without simulating the gap.
    pub fn jump(&mut self, timestamp: i64) {
        self.valid_at = self.valid_at.max(timestamp);
    }

    /// Marks the actor destroyed at `timestamp`.
    pub fn destroy(&mut self, timestamp: i64) {
        self.actor.set_destroyed(timestamp);
        self.actor.set_moving(false);
        self.actor.set_dirty();
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn into_actor(self) -> Actor {
        self.actor
    }

    pub fn timestamp(&self) -> i64 {
        self.valid_at
    }

    pub fn kind(&self) -> AdvancerKind {
        self.kind
    }

    /// Cached world-space collision shape.
    pub fn shape(&self) -> &TransformedShape {
        &self.shape
    }

    /// Clears the actor's dirty flag, returning whether it was set.
    pub fn take_dirty(&mut self) -> bool {
        self.actor.clear_dirty()
    }

    fn start(&mut self, timestamp: i64) {
        if self.kind != AdvancerKind::Static
            && self.actor.created() == timestamp
            && self.actor.config().start_moving
        {
            let rotation = self.actor.rotation();
            self.actor.set_direction(rotation);
            self.actor.set_moving(true);
        }
    }

    fn step(&mut self, start: i64, end: i64) {
        match self.kind {
            AdvancerKind::Static => {}
            AdvancerKind::Mobile => self.mobile_step(start, end),
            AdvancerKind::Pawn => {
                self.mobile_step(start, end);
                self.update_activity();
                self.update_input();
            }
        }
    }

    /// Runs equal substeps from `start` to `end` (ms). The substep count is
    /// an integer so long gaps cannot stall on float rounding.
    fn mobile_step(&mut self, start: i64, end: i64) {
        let span = end - start;
        let count = if self.cfg.max_substep > 0.0 {
            let per_substep = f64::from(self.cfg.max_substep) * 1000.0;
            (span as f64 / per_substep).ceil().max(1.0) as u64
        } else {
            1
        };
        let dt = (span as f64 / 1000.0 / count as f64) as f32;
        for i in 1..=count {
            let offset = i128::from(span) * i128::from(i) / i128::from(count);
            self.substep(dt, start + offset as i64);
        }
    }

    fn substep(&mut self, elapsed: f32, timestamp: i64) {
        let otrans = self.actor.translation();
        let directions = self.env.directions(&self.actor, &self.shape);
        self.actor.step(elapsed, timestamp, directions);

        let ntrans = self.actor.translation();
        if ntrans == otrans {
            return;
        }
        if let Some(max_step) = self.actor.config().max_step {
            let displacement = ntrans - otrans;
            if displacement.len_sq() > max_step * max_step {
                let clamped = displacement * (max_step / displacement.len());
                self.actor.set_translation(otrans + clamped);
            }
        }
        self.actor.set_dirty();

        if self.cfg.penetration_attempts == 0 {
            self.update_shape();
            return;
        }
        for _ in 0..self.cfg.penetration_attempts {
            self.update_shape();
            let Some(penetration) = self.env.penetration(&self.actor, &self.shape) else {
                return;
            };
            let corrected =
                self.actor.translation() + penetration * self.cfg.penetration_overshoot;
            self.actor.set_translation(corrected);
        }

        // Rather stuck than inside a wall.
        debug!(actor = ?self.actor.id(), timestamp, "Unresolved penetration, reverting substep");
        self.actor.set_translation(otrans);
        self.update_shape();
    }

    fn update_activity(&mut self) {
        if self.actor.activity_expired(self.valid_at) {
            self.actor.set_activity(None);
            self.actor.set_dirty();
        }
    }

    fn update_input(&mut self) {
        let Some(frame) = self.pending.take() else {
            return;
        };

        if frame.is_set(InputFlags::ACTION)
            && self.actor.activity().is_none()
            && self.actor.config().activity.is_some()
        {
            self.actor.set_activity(Some(Activity {
                started: frame.timestamp,
            }));
            self.actor.set_dirty();
        }

        if self.actor.can_rotate() && self.actor.rotation() != frame.rotation {
            self.actor.set_rotation(frame.rotation);
            self.actor.set_dirty();
        }

        let was_moving = self.actor.is_moving();
        let old_direction = self.actor.direction();
        if frame.is_set(InputFlags::MOVE) && self.actor.can_move() {
            self.actor.set_direction(frame.direction);
            self.actor.set_moving(true);
        } else {
            self.actor.set_moving(false);
        }
        if was_moving != self.actor.is_moving() || old_direction != self.actor.direction() {
            self.actor.set_dirty();
        }

        self.update_shape();
    }

    fn update_shape(&mut self) {
        self.shape = self
            .actor
            .config()
            .shape
            .transform(self.actor.translation(), self.actor.rotation());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::{
        actor::{ActivityConfig, ActorConfig, ActorId},
        environment::{Directions, NullEnvironment, TileEnvironment, TileMap},
        math::Vec2,
    };

    /// Records every directions query; optionally reports a fixed number of
    /// penetrations before clearing.
    #[derive(Default)]
    struct ProbeEnvironment {
        direction_calls: AtomicUsize,
        penetration_calls: AtomicUsize,
        translations: Mutex<Vec<Vec2>>,
        /// Penetrations to report before answering `None`; `usize::MAX` never clears.
        penetrating: usize,
        push: Vec2,
    }

    impl ProbeEnvironment {
        fn penetrating(count: usize, push: Vec2) -> Self {
            Self {
                penetrating: count,
                push,
                ..Default::default()
            }
        }
    }

    impl Environment for ProbeEnvironment {
        fn penetration(&self, _actor: &Actor, _shape: &TransformedShape) -> Option<Vec2> {
            let call = self.penetration_calls.fetch_add(1, Ordering::SeqCst);
            (call < self.penetrating).then_some(self.push)
        }

        fn collides_mask(&self, _mask: u32, _shape: &TransformedShape) -> bool {
            false
        }

        fn directions(&self, actor: &Actor, _shape: &TransformedShape) -> Directions {
            self.direction_calls.fetch_add(1, Ordering::SeqCst);
            self.translations.lock().unwrap().push(actor.translation());
            Directions::empty()
        }
    }

    fn walker(config: ActorConfig) -> Actor {
        Actor::new(ActorId(1), Arc::new(config), 0, Vec2::ZERO, 0.0)
            .with_direction(0.0)
            .with_moving(true)
    }

    fn advancer(env: Arc<dyn Environment>, actor: Actor) -> Advancer {
        Advancer::new(env, actor, 0, AdvancerConfig::default())
    }

    #[test]
    fn stale_advance_is_a_no_op() {
        let mut adv = advancer(Arc::new(NullEnvironment), walker(ActorConfig::mobile(1.0)));
        adv.advance(500);
        let before = adv.actor().clone();
        for t in [500, 499, 0, -100] {
            adv.advance(t);
            assert_eq!(adv.timestamp(), 500);
            assert_eq!(adv.actor(), &before);
        }
    }

    #[test]
    fn clock_never_goes_back() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut adv = advancer(Arc::new(NullEnvironment), walker(ActorConfig::mobile(1.0)));
        let mut last = adv.timestamp();
        for _ in 0..200 {
            let t = rng.gen_range(-500..5000);
            if rng.gen_bool(0.5) {
                adv.advance(t);
            } else {
                adv.jump(t);
            }
            assert!(adv.timestamp() >= last);
            last = adv.timestamp();
        }
    }

    #[test]
    fn advance_splits_into_bounded_substeps() {
        let env = Arc::new(ProbeEnvironment::default());
        let speed = 6.0;
        let mut adv = advancer(env.clone(), walker(ActorConfig::mobile(speed)));
        adv.advance(200);

        assert!(env.direction_calls.load(Ordering::SeqCst) >= 12);
        // Each substep moves at most speed / 60 units.
        let mut seen = env.translations.lock().unwrap().clone();
        seen.push(adv.actor().translation());
        for pair in seen.windows(2) {
            assert!(pair[0].distance(pair[1]) <= speed / 60.0 + 1e-5);
        }
        assert!((adv.actor().translation().x - 1.2).abs() < 1e-4);
    }

    #[test]
    fn jump_skips_simulation() {
        let env = Arc::new(ProbeEnvironment::default());
        let mut adv = advancer(env.clone(), walker(ActorConfig::mobile(1.0)));
        adv.jump(1000);
        adv.jump(400);
        assert_eq!(adv.timestamp(), 1000);
        assert_eq!(env.direction_calls.load(Ordering::SeqCst), 0);
        assert_eq!(adv.actor().translation(), Vec2::ZERO);
    }

    #[test]
    fn oversized_step_is_clamped_to_max_step() {
        let config = ActorConfig {
            max_step: Some(0.5),
            ..ActorConfig::mobile(100.0)
        };
        let direction = 0.6_f32;
        let actor = walker(config).with_direction(direction);
        let mut adv = advancer(Arc::new(NullEnvironment), actor);
        adv.advance(16);

        let moved = adv.actor().translation();
        assert!((moved.len() - 0.5).abs() < 1e-5);
        let along = Vec2::from_angle(direction);
        assert!((moved.normalize_or_zero().dot(along) - 1.0).abs() < 1e-5);
        assert!(adv.take_dirty());
        assert!(!adv.take_dirty());
    }

    #[test]
    fn single_correction_resolves_penetration() {
        let push = Vec2::new(-0.1, 0.0);
        let env = Arc::new(ProbeEnvironment::penetrating(1, push));
        let mut adv = advancer(env.clone(), walker(ActorConfig::mobile(6.0)));
        adv.advance(10);

        assert_eq!(env.penetration_calls.load(Ordering::SeqCst), 2);
        let expected = 6.0 * 0.01 + push.x * 1.001;
        assert!((adv.actor().translation().x - expected).abs() < 1e-6);
        assert_eq!(adv.shape().center(), adv.actor().translation());
    }

    #[test]
    fn unresolved_penetration_reverts_exactly() {
        let env = Arc::new(ProbeEnvironment::penetrating(usize::MAX, Vec2::new(0.0, 0.01)));
        let start = Vec2::new(3.25, -1.5);
        let actor = Actor::new(ActorId(1), Arc::new(ActorConfig::mobile(6.0)), 0, start, 0.0)
            .with_moving(true);
        let mut adv = advancer(env.clone(), actor);
        adv.advance(10);

        assert_eq!(adv.actor().translation(), start);
        assert_eq!(env.penetration_calls.load(Ordering::SeqCst), 3);
        assert_eq!(adv.shape().center(), start);
    }

    #[test]
    fn penetration_budget_is_configurable() {
        let env = Arc::new(ProbeEnvironment::penetrating(4, Vec2::new(0.0, 0.01)));
        let cfg = AdvancerConfig {
            penetration_attempts: 5,
            ..Default::default()
        };
        let mut adv = Advancer::new(env.clone(), walker(ActorConfig::mobile(6.0)), 0, cfg);
        adv.advance(10);
        assert_eq!(env.penetration_calls.load(Ordering::SeqCst), 5);
        assert!((adv.actor().translation().y - 0.04 * 1.001).abs() < 1e-6);
    }

    #[test]
    fn start_moving_kicks_off_on_spawn() {
        let config = ActorConfig {
            start_moving: true,
            ..ActorConfig::mobile(2.0)
        };
        let actor = Actor::new(ActorId(9), Arc::new(config), 0, Vec2::ZERO, 1.25);
        assert!(!actor.is_moving());
        let adv = advancer(Arc::new(NullEnvironment), actor);
        assert!(adv.actor().is_moving());
        assert_eq!(adv.actor().direction(), 1.25);
    }

    #[test]
    fn start_moving_ignored_for_late_init() {
        let config = ActorConfig {
            start_moving: true,
            ..ActorConfig::mobile(2.0)
        };
        let actor = Actor::new(ActorId(9), Arc::new(config), 0, Vec2::ZERO, 1.25);
        let adv = Advancer::new(Arc::new(NullEnvironment), actor, 100, AdvancerConfig::default());
        assert!(!adv.actor().is_moving());
    }

    #[test]
    fn static_actor_only_moves_clock() {
        let env = Arc::new(ProbeEnvironment::default());
        let actor = Actor::new(ActorId(2), Arc::new(ActorConfig::default()), 0, Vec2::ZERO, 0.0)
            .with_moving(true);
        let mut adv = advancer(env.clone(), actor);
        adv.advance(1000);
        assert_eq!(adv.kind(), AdvancerKind::Static);
        assert_eq!(adv.timestamp(), 1000);
        assert_eq!(adv.actor().translation(), Vec2::ZERO);
        assert_eq!(env.direction_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pawn_input_sets_intent() {
        let pawn = Actor::new(ActorId(3), Arc::new(ActorConfig::pawn(3.0)), 0, Vec2::ZERO, 0.0);
        let mut adv = advancer(Arc::new(NullEnvironment), pawn);

        adv.advance_input(InputFrame::new(100, 0.5, 1.0, InputFlags::MOVE));
        assert!(adv.actor().is_moving());
        assert_eq!(adv.actor().direction(), 1.0);
        assert_eq!(adv.actor().rotation(), 0.5);
        // Intent applies after the physics of the step, so no movement yet.
        assert_eq!(adv.actor().translation(), Vec2::ZERO);

        adv.advance(200);
        let moved = adv.actor().translation();
        assert!((moved.len() - 0.3).abs() < 1e-4);

        adv.advance_input(InputFrame::new(300, 0.5, 1.0, InputFlags::empty()));
        assert!(!adv.actor().is_moving());
    }

    #[test]
    fn stale_input_waits_for_next_step() {
        let pawn = Actor::new(ActorId(3), Arc::new(ActorConfig::pawn(3.0)), 0, Vec2::ZERO, 0.0);
        let mut adv = advancer(Arc::new(NullEnvironment), pawn);
        adv.advance(100);
        adv.advance_input(InputFrame::new(50, 0.0, 0.0, InputFlags::MOVE));
        assert!(!adv.actor().is_moving());
        adv.advance(150);
        assert!(adv.actor().is_moving());
    }

    #[test]
    fn activity_blocks_movement_until_it_ends() {
        let config = ActorConfig {
            activity: Some(ActivityConfig {
                duration_ms: 200,
                can_move: false,
                can_rotate: false,
            }),
            ..ActorConfig::pawn(3.0)
        };
        let pawn = Actor::new(ActorId(4), Arc::new(config), 0, Vec2::ZERO, 0.0);
        let mut adv = advancer(Arc::new(NullEnvironment), pawn);

        adv.advance_input(InputFrame::new(
            100,
            2.0,
            1.0,
            InputFlags::MOVE | InputFlags::ACTION,
        ));
        assert_eq!(adv.actor().activity(), Some(Activity { started: 100 }));
        assert!(!adv.actor().is_moving());
        assert_eq!(adv.actor().rotation(), 0.0);

        adv.advance_input(InputFrame::new(300, 2.0, 1.0, InputFlags::MOVE));
        assert_eq!(adv.actor().activity(), None);
        assert!(adv.actor().is_moving());
        assert_eq!(adv.actor().rotation(), 2.0);
    }

    #[test]
    fn walker_stops_at_tile_wall() {
        let env: Arc<dyn Environment> = Arc::new(TileEnvironment::new(TileMap::arena(10, 10)));
        let actor = Actor::new(
            ActorId(5),
            Arc::new(ActorConfig::mobile(5.0)),
            0,
            Vec2::new(5.0, 5.0),
            0.0,
        )
        .with_moving(true);
        let mut adv = Advancer::new(env.clone(), actor, 0, AdvancerConfig::default());
        for t in (50..=2000).step_by(50) {
            adv.advance(t);
            assert!(env.penetration(adv.actor(), adv.shape()).is_none(), "t = {t}");
        }
        let x = adv.actor().translation().x;
        assert!(x > 8.3 && x <= 8.5 + 1e-3, "x = {x}");
    }

    #[test]
    fn substep_count_is_exact() {
        let env = Arc::new(ProbeEnvironment::default());
        let mut adv = advancer(env.clone(), walker(ActorConfig::mobile(1.0)));
        adv.advance(1000);
        assert_eq!(env.direction_calls.load(Ordering::SeqCst), 60);
        adv.advance(1010);
        assert_eq!(env.direction_calls.load(Ordering::SeqCst), 61);
        assert!((adv.actor().translation().x - 1.01).abs() < 1e-4);
    }

    #[test]
    fn multi_day_gap_completes() {
        // Seven days: the remaining time dwarfs one substep in f32.
        let end = 7 * 24 * 3600 * 1000;
        let mut adv = advancer(Arc::new(NullEnvironment), walker(ActorConfig::mobile(1.0)));
        adv.advance(end);
        assert_eq!(adv.timestamp(), end);
        let x = adv.actor().translation().x;
        assert!(x.is_finite() && x > 0.0, "x = {x}");
    }

    #[test]
    fn zero_penetration_budget_skips_correction() {
        let env = Arc::new(ProbeEnvironment::penetrating(usize::MAX, Vec2::new(0.0, 0.01)));
        let cfg = AdvancerConfig {
            penetration_attempts: 0,
            ..Default::default()
        };
        let mut adv = Advancer::new(env.clone(), walker(ActorConfig::mobile(6.0)), 0, cfg);
        adv.advance(100);
        assert_eq!(env.penetration_calls.load(Ordering::SeqCst), 0);
        assert!((adv.actor().translation().x - 0.6).abs() < 1e-4);
        assert_eq!(adv.shape().center(), adv.actor().translation());
    }

    #[test]
    fn init_resets_state() {
        let mut adv = advancer(Arc::new(NullEnvironment), walker(ActorConfig::mobile(1.0)));
        adv.advance(1000);
        let fresh = Actor::new(ActorId(1), Arc::new(ActorConfig::pawn(1.0)), 0, Vec2::new(1.0, 1.0), 0.0);
        adv.init(fresh, 50);
        assert_eq!(adv.timestamp(), 50);
        assert_eq!(adv.kind(), AdvancerKind::Pawn);
        assert_eq!(adv.shape().center(), Vec2::new(1.0, 1.0));
    }
}
