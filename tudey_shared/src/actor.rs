//! Actors.
//!
//! An `Actor` is the replicated kinematic state of one scene entity. The
//! server owns the authoritative copy (inside an `Advancer`); clients receive
//! snapshots and either buffer them in a `History` or, for the pawn they
//! control, predict them locally.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    advancer::Advancer,
    config::AdvancerConfig,
    environment::{Directions, Environment},
    history::Timeline,
    math::{lerp_angle, Vec2},
    shape::Shape,
};

/// Opaque actor id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u32);

/// Selects how an actor is advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// No physics; advancing only moves the clock.
    #[default]
    Static,
    /// Dead-reckoned movement with obstacle resolution.
    Mobile,
    /// Player-controlled mobile actor driven by input frames.
    Pawn,
}

/// Timed activity a pawn can perform (attack, emote, ...).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityConfig {
    pub duration_ms: i64,
    #[serde(default)]
    pub can_move: bool,
    #[serde(default)]
    pub can_rotate: bool,
}

/// Static actor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorConfig {
    #[serde(default)]
    pub kind: ActorKind,
    #[serde(default)]
    pub shape: Shape,
    /// Movement speed in units per second.
    #[serde(default)]
    pub speed: f32,
    /// Largest displacement allowed in one substep; unbounded if absent.
    #[serde(default)]
    pub max_step: Option<f32>,
    /// Start moving along the rotation when spawned.
    #[serde(default)]
    pub start_moving: bool,
    /// Tile layers this actor collides with.
    #[serde(default = "default_collision_mask")]
    pub collision_mask: u32,
    #[serde(default)]
    pub activity: Option<ActivityConfig>,
}

fn default_collision_mask() -> u32 {
    1
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            kind: ActorKind::default(),
            shape: Shape::default(),
            speed: 0.0,
            max_step: None,
            start_moving: false,
            collision_mask: default_collision_mask(),
            activity: None,
        }
    }
}

impl ActorConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn mobile(speed: f32) -> Self {
        Self {
            kind: ActorKind::Mobile,
            speed,
            ..Default::default()
        }
    }

    pub fn pawn(speed: f32) -> Self {
        Self {
            kind: ActorKind::Pawn,
            speed,
            ..Default::default()
        }
    }
}

/// Activity in progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub started: i64,
}

bitflags::bitflags! {
    /// Actor state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ActorFlags: u32 {
        const MOVING = 1 << 0;
        const DIRTY = 1 << 1; // Changed since last replicated
    }
}

/// Replicated actor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    id: ActorId,
    config: Arc<ActorConfig>,
    created: i64,
    destroyed: Option<i64>,
    translation: Vec2,
    rotation: f32,
    direction: f32,
    flags: ActorFlags,
    activity: Option<Activity>,
}

impl Actor {
    pub fn new(
        id: ActorId,
        config: Arc<ActorConfig>,
        created: i64,
        translation: Vec2,
        rotation: f32,
    ) -> Self {
        Self {
            id,
            config,
            created,
            destroyed: None,
            translation,
            rotation,
            direction: rotation,
            flags: ActorFlags::empty(),
            activity: None,
        }
    }

    /// Builder: sets the movement direction.
    pub fn with_direction(mut self, direction: f32) -> Self {
        self.direction = direction;
        self
    }

    /// Builder: sets or clears the moving flag.
    pub fn with_moving(mut self, moving: bool) -> Self {
        self.set_moving(moving);
        self
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn config(&self) -> &Arc<ActorConfig> {
        &self.config
    }

    pub fn kind(&self) -> ActorKind {
        self.config.kind
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn destroyed(&self) -> Option<i64> {
        self.destroyed
    }

    pub fn translation(&self) -> Vec2 {
        self.translation
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn direction(&self) -> f32 {
        self.direction
    }

    pub fn flags(&self) -> ActorFlags {
        self.flags
    }

    pub fn is_moving(&self) -> bool {
        self.flags.contains(ActorFlags::MOVING)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(ActorFlags::DIRTY)
    }

    pub fn activity(&self) -> Option<Activity> {
        self.activity
    }

    /// Velocity implied by the current direction and moving flag.
    pub fn velocity(&self) -> Vec2 {
        if self.is_moving() {
            Vec2::from_angle(self.direction) * self.config.speed
        } else {
            Vec2::ZERO
        }
    }

    pub(crate) fn set_translation(&mut self, translation: Vec2) {
        self.translation = translation;
    }

    pub(crate) fn set_rotation(&mut self, rotation: f32) {
        self.rotation = rotation;
    }

    pub(crate) fn set_direction(&mut self, direction: f32) {
        self.direction = direction;
    }

    pub(crate) fn set_moving(&mut self, moving: bool) {
        self.flags.set(ActorFlags::MOVING, moving);
    }

    pub(crate) fn set_dirty(&mut self) {
        self.flags.insert(ActorFlags::DIRTY);
    }

    /// Clears the dirty flag, returning whether it was set.
    pub(crate) fn clear_dirty(&mut self) -> bool {
        let dirty = self.is_dirty();
        self.flags.remove(ActorFlags::DIRTY);
        dirty
    }

    pub(crate) fn set_destroyed(&mut self, timestamp: i64) {
        self.destroyed = Some(timestamp);
    }

    pub(crate) fn set_activity(&mut self, activity: Option<Activity>) {
        self.activity = activity;
    }

    /// Whether the current activity has run its course at `timestamp`.
    pub fn activity_expired(&self, timestamp: i64) -> bool {
        match (self.activity, self.config.activity) {
            (Some(activity), Some(config)) => timestamp >= activity.started + config.duration_ms,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Whether the actor may turn right now.
    pub fn can_rotate(&self) -> bool {
        self.activity.is_none() || self.config.activity.is_some_and(|a| a.can_rotate)
    }

    /// Whether the actor may change its movement right now.
    pub fn can_move(&self) -> bool {
        self.activity.is_none() || self.config.activity.is_some_and(|a| a.can_move)
    }

    /// Integrates one step of motion.
    ///
    /// Velocity components heading into a blocked direction are dropped so
    /// the actor slides along walls instead of grinding into them.
    pub fn step(&mut self, elapsed: f32, _timestamp: i64, directions: Directions) {
        if !self.is_moving() {
            return;
        }
        let mut velocity = self.velocity();
        if (velocity.x > 0.0 && directions.contains(Directions::EAST))
            || (velocity.x < 0.0 && directions.contains(Directions::WEST))
        {
            velocity.x = 0.0;
        }
        if (velocity.y > 0.0 && directions.contains(Directions::NORTH))
            || (velocity.y < 0.0 && directions.contains(Directions::SOUTH))
        {
            velocity.y = 0.0;
        }
        self.translation += velocity * elapsed;
    }

    /// Creates an advancer when this actor should be advanced locally rather
    /// than buffered: only for the pawn the local client controls.
    pub fn maybe_create_advancer(
        &self,
        env: Arc<dyn Environment>,
        timestamp: i64,
        cfg: AdvancerConfig,
        controlled: bool,
    ) -> Option<Advancer> {
        if !controlled || self.kind() == ActorKind::Static {
            return None;
        }
        Some(Advancer::new(env, self.clone(), timestamp, cfg))
    }

    fn expire_activity(&mut self, timestamp: i64) {
        if self.activity_expired(timestamp) {
            self.activity = None;
        }
    }
}

impl Timeline for Actor {
    fn extrapolate(&self, elapsed: f32, timestamp: i64) -> Self {
        let mut result = self.clone();
        result.translation += self.velocity() * elapsed;
        result.expire_activity(timestamp);
        result
    }

    fn interpolate(&self, other: &Self, start: i64, end: i64, timestamp: i64) -> Self {
        let t = (timestamp - start) as f32 / (end - start) as f32;
        let mut result = self.clone();
        result.translation = self.translation.lerp(other.translation, t);
        result.rotation = lerp_angle(self.rotation, other.rotation, t);
        result.expire_activity(timestamp);
        result
    }

    fn created(&self) -> i64 {
        self.created
    }

    fn destroyed(&self) -> Option<i64> {
        self.destroyed
    }
}
