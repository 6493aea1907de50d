//! Client scene view.
//!
//! The view is fed scene ticks from the server and keeps two kinds of actors:
//! - Remote actors, buffered in a `History` and displayed at a delayed
//!   timestamp so there is usually a pair of snapshots to interpolate.
//! - The local pawn, predicted by an `Advancer` from local input frames.
//!
//! The predicted pawn is never rewound to server state.

use std::{
    collections::{btree_map::Entry, BTreeMap, BTreeSet},
    sync::Arc,
};

use tracing::{debug, trace};
use tudey_shared::{
    actor::{Actor, ActorId, ActorKind},
    advancer::Advancer,
    config::{AdvancerConfig, HistoryConfig},
    environment::Environment,
    history::{History, Lookup},
    input::InputFrame,
    net::SceneTick,
};

/// A buffered actor and its last displayed state.
struct RemoteActor {
    history: History<Actor>,
    current: Actor,
    visible: bool,
}

impl RemoteActor {
    fn new(timestamp: i64, actor: Actor, duration: i64) -> Self {
        Self {
            history: History::new(timestamp, actor.clone(), duration),
            current: actor,
            visible: false,
        }
    }
}

/// What the client displays.
pub struct SceneView {
    env: Arc<dyn Environment>,
    history_cfg: HistoryConfig,
    advancer_cfg: AdvancerConfig,
    pawn_id: Option<ActorId>,
    pawn: Option<Advancer>,
    remotes: BTreeMap<ActorId, RemoteActor>,
    last_tick: Option<i64>,
}

impl SceneView {
    pub fn new(
        env: Arc<dyn Environment>,
        history_cfg: HistoryConfig,
        advancer_cfg: AdvancerConfig,
    ) -> Self {
        Self {
            env,
            history_cfg,
            advancer_cfg,
            pawn_id: None,
            pawn: None,
            remotes: BTreeMap::new(),
            last_tick: None,
        }
    }

    /// Names the actor this client controls.
    pub fn set_pawn(&mut self, id: ActorId) {
        if self.pawn_id != Some(id) {
            self.pawn = None;
        }
        self.pawn_id = Some(id);
    }

    pub fn pawn_id(&self) -> Option<ActorId> {
        self.pawn_id
    }

    /// Timestamp of the newest accepted tick.
    pub fn last_tick(&self) -> Option<i64> {
        self.last_tick
    }

    /// Applies a scene tick. Returns false if it was dropped as stale.
    pub fn receive(&mut self, tick: &SceneTick) -> bool {
        if self.last_tick.is_some_and(|last| tick.timestamp <= last) {
            debug!(timestamp = tick.timestamp, last = ?self.last_tick, "Dropping stale tick");
            return false;
        }
        self.last_tick = Some(tick.timestamp);

        let duration = self.history_cfg.duration_ms;
        let mut listed = BTreeSet::new();
        for actor in &tick.actors {
            let id = actor.id();
            listed.insert(id);
            if self.predict(actor, tick.timestamp) {
                continue;
            }
            match self.remotes.entry(id) {
                Entry::Vacant(slot) => {
                    trace!(actor = ?id, timestamp = tick.timestamp, "New remote actor");
                    slot.insert(RemoteActor::new(tick.timestamp, actor.clone(), duration));
                }
                Entry::Occupied(mut slot) => {
                    slot.get_mut().history.record(tick.timestamp, actor.clone(), true);
                }
            }
        }

        for id in &tick.removed {
            self.remotes.remove(id);
            if self.pawn_id == Some(*id) {
                self.pawn = None;
            }
        }

        if tick.full {
            self.remotes.retain(|id, _| listed.contains(id));
        } else {
            // Unchanged actors still extend their buffers.
            for (id, remote) in self.remotes.iter_mut() {
                if !listed.contains(id) {
                    let actor = remote.history.last_known_actor().clone();
                    remote.history.record(tick.timestamp, actor, false);
                }
            }
        }
        true
    }

    /// Takes over the pawn locally. Returns whether `actor` is predicted.
    fn predict(&mut self, actor: &Actor, timestamp: i64) -> bool {
        if self.pawn_id != Some(actor.id()) {
            return false;
        }
        if actor.destroyed().is_some() {
            self.pawn = None;
            return false;
        }
        if self.pawn.is_none() {
            self.pawn =
                actor.maybe_create_advancer(self.env.clone(), timestamp, self.advancer_cfg, true);
            if self.pawn.is_some() {
                debug!(actor = ?actor.id(), timestamp, "Predicting pawn");
                self.remotes.remove(&actor.id());
            }
        }
        self.pawn.is_some()
    }

    /// Feeds a local input frame to the predicted pawn.
    pub fn input(&mut self, frame: InputFrame) {
        if let Some(pawn) = &mut self.pawn {
            pawn.advance_input(frame);
        }
    }

    /// Brings the view to `now`: the pawn is advanced, remote actors are
    /// looked up at `now` minus the buffer delay.
    pub fn advance(&mut self, now: i64) {
        let delayed = now - self.history_cfg.buffer_delay_ms;
        for remote in self.remotes.values_mut() {
            let is_static = remote.history.last_known_actor().kind() == ActorKind::Static;
            if let Lookup::Updated(actor) = remote.history.get(delayed, is_static) {
                remote.current = actor;
            }
            remote.visible =
                remote.history.is_created(delayed) && !remote.history.is_destroyed(delayed);
        }
        if let Some(pawn) = &mut self.pawn {
            pawn.advance(now);
        }
    }

    /// Moves the pawn's clock to `now` without simulating the gap.
    pub fn jump(&mut self, now: i64) {
        if let Some(pawn) = &mut self.pawn {
            pawn.jump(now);
        }
    }

    /// Displayed state of an actor, visible or not.
    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        match &self.pawn {
            Some(pawn) if self.pawn_id == Some(id) => Some(pawn.actor()),
            _ => self.remotes.get(&id).map(|remote| &remote.current),
        }
    }

    /// The predicted pawn, once the server has sent it.
    pub fn pawn(&self) -> Option<&Actor> {
        self.pawn.as_ref().map(Advancer::actor)
    }

    /// Actors to draw.
    pub fn visible(&self) -> impl Iterator<Item = &Actor> + '_ {
        self.remotes
            .values()
            .filter(|remote| remote.visible)
            .map(|remote| &remote.current)
            .chain(self.pawn())
    }

    /// Number of tracked actors, pawn included.
    pub fn len(&self) -> usize {
        self.remotes.len() + usize::from(self.pawn.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use tudey_shared::{
        actor::ActorConfig,
        environment::NullEnvironment,
        input::InputFlags,
        math::Vec2,
    };

    use super::*;

    fn view() -> SceneView {
        SceneView::new(
            Arc::new(NullEnvironment),
            HistoryConfig {
                duration_ms: 1000,
                buffer_delay_ms: 100,
            },
            AdvancerConfig::default(),
        )
    }

    fn walker(id: u32, created: i64, x: f32) -> Actor {
        Actor::new(ActorId(id), Arc::new(ActorConfig::mobile(10.0)), created, Vec2::new(x, 0.0), 0.0)
            .with_moving(true)
    }

    fn tick(timestamp: i64, actors: Vec<Actor>) -> SceneTick {
        SceneTick {
            timestamp,
            actors,
            ..Default::default()
        }
    }

    #[test]
    fn remote_actor_is_interpolated_at_delayed_time() {
        let mut view = view();
        for t in [0, 100, 200] {
            assert!(view.receive(&tick(t, vec![walker(1, 0, t as f32 / 100.0)])));
        }
        view.advance(250);
        let x = view.actor(ActorId(1)).unwrap().translation().x;
        assert!((x - 1.5).abs() < 1e-5, "x = {x}");
        assert_eq!(view.visible().count(), 1);
    }

    #[test]
    fn stale_and_duplicate_ticks_are_dropped() {
        let mut view = view();
        assert!(view.receive(&tick(200, vec![walker(1, 0, 2.0)])));
        assert!(!view.receive(&tick(200, vec![walker(1, 0, 9.0)])));
        assert!(!view.receive(&tick(150, vec![walker(1, 0, 9.0)])));
        assert_eq!(view.last_tick(), Some(200));
        view.advance(300);
        // Only the first snapshot was buffered; extrapolated from it.
        let x = view.actor(ActorId(1)).unwrap().translation().x;
        assert!((x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn unlisted_actor_keeps_its_last_state() {
        let mut view = view();
        let prop = Actor::new(ActorId(2), Arc::new(ActorConfig::default()), 0, Vec2::new(3.0, 4.0), 0.0);
        view.receive(&tick(0, vec![prop]));
        view.receive(&tick(100, vec![]));
        view.receive(&tick(200, vec![]));
        view.advance(250);
        assert_eq!(view.actor(ActorId(2)).unwrap().translation(), Vec2::new(3.0, 4.0));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn visibility_follows_lifecycle_at_delayed_time() {
        let mut view = view();
        let born = walker(3, 300, 0.0).with_moving(false);
        view.receive(&tick(300, vec![born.clone()]));
        view.advance(350);
        assert_eq!(view.visible().count(), 0);
        view.advance(400);
        assert_eq!(view.visible().count(), 1);

        let mut server = Advancer::new(Arc::new(NullEnvironment), born, 300, AdvancerConfig::default());
        server.destroy(500);
        view.receive(&tick(500, vec![server.actor().clone()]));

        view.advance(599);
        assert_eq!(view.visible().count(), 1);
        view.advance(600);
        assert_eq!(view.visible().count(), 0);
        assert!(view.actor(ActorId(3)).is_some());
    }

    #[test]
    fn removed_and_full_ticks_drop_actors() {
        let mut view = view();
        view.receive(&tick(0, vec![walker(1, 0, 0.0), walker(2, 0, 5.0)]));
        let removal = SceneTick {
            timestamp: 100,
            removed: vec![ActorId(1)],
            ..Default::default()
        };
        view.receive(&removal);
        assert!(view.actor(ActorId(1)).is_none());

        view.receive(&tick(200, vec![walker(3, 200, 0.0)]));
        let full = SceneTick {
            timestamp: 300,
            actors: vec![walker(3, 200, 1.0)],
            full: true,
            ..Default::default()
        };
        view.receive(&full);
        assert!(view.actor(ActorId(2)).is_none());
        assert!(view.actor(ActorId(3)).is_some());
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn pawn_is_predicted_and_not_rewound() {
        let mut view = view();
        let pawn_id = ActorId(9);
        view.set_pawn(pawn_id);
        let pawn = Actor::new(pawn_id, Arc::new(ActorConfig::pawn(2.0)), 0, Vec2::ZERO, 0.0);
        view.receive(&tick(0, vec![pawn.clone()]));
        assert!(view.pawn().is_some());

        view.input(InputFrame::new(10, 0.0, 0.0, InputFlags::MOVE));
        view.advance(510);
        let x = view.pawn().unwrap().translation().x;
        assert!((x - 1.0).abs() < 1e-4, "x = {x}");

        // Server still reports the spawn position; prediction stands.
        view.receive(&tick(100, vec![pawn]));
        assert!((view.actor(pawn_id).unwrap().translation().x - 1.0).abs() < 1e-4);
        assert_eq!(view.visible().count(), 1);

        view.jump(10_000);
        view.advance(10_000);
        assert!((view.pawn().unwrap().translation().x - 1.0).abs() < 1e-4);
    }

    #[test]
    fn static_pawn_falls_back_to_history() {
        let mut view = view();
        view.set_pawn(ActorId(4));
        let prop = Actor::new(ActorId(4), Arc::new(ActorConfig::default()), 0, Vec2::ZERO, 0.0);
        view.receive(&tick(0, vec![prop]));
        assert!(view.pawn().is_none());
        assert!(view.actor(ActorId(4)).is_some());
    }
}
