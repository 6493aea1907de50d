//! Authoritative scene.
//!
//! Every actor in the scene is owned by an `Advancer`. Each tick, queued
//! input frames that have come due are fed to their pawns, all actors are
//! advanced to the tick timestamp, and the actors that changed are collected
//! into a `SceneTick` for replication.
//!
//! Determinism notes:
//! - Actors are stepped in id order (`BTreeMap`).
//! - Input frames are applied in timestamp order, never ahead of the tick.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use tracing::{debug, info, warn};
use tudey_shared::{
    actor::{Actor, ActorConfig, ActorId},
    advancer::Advancer,
    config::AdvancerConfig,
    environment::{Environment, TileEnvironment},
    input::InputFrame,
    math::Vec2,
    net::{ClientId, SceneTick},
};

/// How long destroyed actors linger before removal (ms), so clients see the
/// destruction in their buffered history.
pub const DEFAULT_REMOVAL_DELAY_MS: i64 = 500;

/// Server-side scene state.
pub struct SceneServer {
    env: Arc<TileEnvironment>,
    cfg: AdvancerConfig,
    advancers: BTreeMap<ActorId, Advancer>,
    /// Spawned since the last tick; replicated even if not dirty.
    fresh: BTreeSet<ActorId>,
    pawns: HashMap<ClientId, ActorId>,
    inputs: HashMap<ActorId, Vec<InputFrame>>,
    pawn_config: Arc<ActorConfig>,
    spawn_point: Vec2,
    next_id: u32,
    timestamp: i64,
    removal_delay: i64,
}

impl SceneServer {
    pub fn new(env: Arc<TileEnvironment>, cfg: AdvancerConfig, timestamp: i64) -> Self {
        let map = env.map();
        let spawn_point = Vec2::new(map.width as f32 / 2.0, map.height as f32 / 2.0);
        Self {
            env,
            cfg,
            advancers: BTreeMap::new(),
            fresh: BTreeSet::new(),
            pawns: HashMap::new(),
            inputs: HashMap::new(),
            pawn_config: Arc::new(ActorConfig::pawn(4.0)),
            spawn_point,
            next_id: 1,
            timestamp,
            removal_delay: DEFAULT_REMOVAL_DELAY_MS,
        }
    }

    /// Builder: config used for client pawns.
    pub fn with_pawn_config(mut self, config: ActorConfig) -> Self {
        self.pawn_config = Arc::new(config);
        self
    }

    /// Builder: where pawns are spawned.
    pub fn with_spawn_point(mut self, spawn_point: Vec2) -> Self {
        self.spawn_point = spawn_point;
        self
    }

    /// Builder: delay before destroyed actors are dropped.
    pub fn with_removal_delay(mut self, removal_delay: i64) -> Self {
        self.removal_delay = removal_delay;
        self
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn environment(&self) -> &Arc<TileEnvironment> {
        &self.env
    }

    pub fn len(&self) -> usize {
        self.advancers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advancers.is_empty()
    }

    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.advancers.get(&id).map(Advancer::actor)
    }

    pub fn pawn(&self, client: ClientId) -> Option<ActorId> {
        self.pawns.get(&client).copied()
    }

    /// Adds an actor created now.
    pub fn spawn(&mut self, config: Arc<ActorConfig>, translation: Vec2, rotation: f32) -> ActorId {
        let id = ActorId(self.next_id);
        self.next_id += 1;
        let actor = Actor::new(id, config, self.timestamp, translation, rotation);
        let env: Arc<dyn Environment> = self.env.clone();
        let advancer = Advancer::new(env, actor, self.timestamp, self.cfg);
        self.advancers.insert(id, advancer);
        self.fresh.insert(id);
        debug!(actor = ?id, timestamp = self.timestamp, "Spawned actor");
        id
    }

    /// Spawns the pawn a client controls.
    pub fn join(&mut self, client: ClientId) -> ActorId {
        if let Some(existing) = self.pawn(client) {
            return existing;
        }
        let id = self.spawn(self.pawn_config.clone(), self.spawn_point, 0.0);
        self.pawns.insert(client, id);
        info!(client_id = ?client, pawn = ?id, "Client joined scene");
        id
    }

    /// Destroys a client's pawn.
    pub fn leave(&mut self, client: ClientId) {
        if let Some(pawn) = self.pawns.remove(&client) {
            self.destroy(pawn);
            info!(client_id = ?client, pawn = ?pawn, "Client left scene");
        }
    }

    /// Marks an actor destroyed now. Returns false for unknown actors.
    pub fn destroy(&mut self, id: ActorId) -> bool {
        let Some(advancer) = self.advancers.get_mut(&id) else {
            return false;
        };
        if advancer.actor().destroyed().is_none() {
            advancer.destroy(self.timestamp);
            self.inputs.remove(&id);
        }
        true
    }

    /// Queues an input frame for a client's pawn.
    pub fn queue_input(&mut self, client: ClientId, frame: InputFrame) {
        let Some(pawn) = self.pawn(client) else {
            warn!(client_id = ?client, "Input from client without pawn");
            return;
        };
        let frames = self.inputs.entry(pawn).or_default();
        let at = frames.partition_point(|f| f.timestamp <= frame.timestamp);
        frames.insert(at, frame);
    }

    /// Advances the scene to `timestamp` and collects changed actors.
    pub fn tick(&mut self, timestamp: i64) -> SceneTick {
        self.timestamp = self.timestamp.max(timestamp);
        let now = self.timestamp;

        let mut actors = Vec::new();
        for (id, advancer) in self.advancers.iter_mut() {
            if let Some(frames) = self.inputs.get_mut(id) {
                let due = frames.partition_point(|f| f.timestamp <= now);
                for frame in frames.drain(..due) {
                    advancer.advance_input(frame);
                }
            }
            advancer.advance(now);
            let fresh = self.fresh.remove(id);
            if advancer.take_dirty() || fresh {
                actors.push(advancer.actor().clone());
            }
        }

        let removal_delay = self.removal_delay;
        let expired: Vec<ActorId> = self
            .advancers
            .iter()
            .filter(|(_, advancer)| {
                advancer
                    .actor()
                    .destroyed()
                    .is_some_and(|destroyed| now - destroyed >= removal_delay)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.advancers.remove(id);
            self.inputs.remove(id);
            debug!(actor = ?id, "Removed actor");
        }

        SceneTick {
            timestamp: now,
            actors,
            removed: expired,
            full: false,
        }
    }

    /// Every actor as of the current timestamp, for newly joined clients.
    pub fn full_tick(&self) -> SceneTick {
        SceneTick {
            timestamp: self.timestamp,
            actors: self.advancers.values().map(|a| a.actor().clone()).collect(),
            removed: Vec::new(),
            full: true,
        }
    }
}
