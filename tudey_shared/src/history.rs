//! Actor history.
//!
//! Clients buffer the authoritative snapshots of actors they do not control
//! and display them slightly in the past ("delayed timestamp"), so there is
//! usually a pair of snapshots to interpolate between. Queries outside the
//! buffered range fall back to extrapolation from the nearest end.
//!
//! The buffer always holds at least one entry: it is seeded on construction
//! and pruning never removes the newest entry.

use std::collections::VecDeque;

use tracing::trace;

use crate::search::bracket_by;

/// Kinematic operations `History` needs from a snapshot.
pub trait Timeline: Clone {
    /// Projects the snapshot `elapsed` seconds forward (or back when negative).
    fn extrapolate(&self, elapsed: f32, timestamp: i64) -> Self;

    /// Blends from `self` (valid at `start`) to `other` (valid at `end`).
    fn interpolate(&self, other: &Self, start: i64, end: i64, timestamp: i64) -> Self;

    fn created(&self) -> i64;

    fn destroyed(&self) -> Option<i64>;
}

/// A buffered snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    pub timestamp: i64,
    pub actor: T,
}

/// Result of a history lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// Nothing new since the last lookup of a static actor; keep the
    /// previously returned state.
    Unchanged,
    Updated(T),
}

impl<T> Lookup<T> {
    pub fn updated(self) -> Option<T> {
        match self {
            Lookup::Updated(state) => Some(state),
            Lookup::Unchanged => None,
        }
    }
}

/// Time-ordered buffer of actor snapshots.
#[derive(Debug, Clone)]
pub struct History<T> {
    entries: VecDeque<Entry<T>>,
    duration: i64,
    last_update: i64,
    seen_last: bool,
}

impl<T: Timeline> History<T> {
    /// Creates a history seeded with one snapshot, retaining `duration` ms.
    pub fn new(timestamp: i64, actor: T, duration: i64) -> Self {
        let mut entries = VecDeque::new();
        entries.push_back(Entry { timestamp, actor });
        Self {
            entries,
            duration,
            last_update: timestamp,
            seen_last: false,
        }
    }

    /// Discards everything and reseeds with one snapshot.
    pub fn init(&mut self, timestamp: i64, actor: T) {
        self.entries.clear();
        self.entries.push_back(Entry { timestamp, actor });
        self.last_update = timestamp;
        self.seen_last = false;
    }

    /// Appends a snapshot. Timestamps must not decrease between calls.
    ///
    /// `updated` marks authoritative data (as opposed to re-recording an
    /// unchanged actor to extend the buffer).
    pub fn record(&mut self, timestamp: i64, actor: T, updated: bool) {
        self.entries.push_back(Entry { timestamp, actor });
        if updated {
            self.last_update = timestamp;
            self.seen_last = false;
        }
        while self.entries.len() > 1 && timestamp - self.entries[0].timestamp > self.duration {
            self.entries.pop_front();
        }
        trace!(timestamp, updated, entries = self.entries.len(), "Recorded snapshot");
    }

    /// State at `timestamp`.
    ///
    /// For static actors, returns `Lookup::Unchanged` once the newest update
    /// has already been handed out.
    pub fn get(&mut self, timestamp: i64, is_static: bool) -> Lookup<T> {
        if self.seen_last && is_static {
            return Lookup::Unchanged;
        }
        self.seen_last = timestamp >= self.last_update;

        let oldest = self.oldest();
        if timestamp <= oldest.timestamp {
            return Lookup::Updated(extrapolate_from(oldest, timestamp));
        }
        let newest = self.newest();
        if timestamp >= newest.timestamp {
            return Lookup::Updated(extrapolate_from(newest, timestamp));
        }

        let entries = &self.entries;
        let (lo, hi) = bracket_by(entries.len(), timestamp, |i| entries[i].timestamp);
        let (start, end) = (&entries[lo], &entries[hi]);
        Lookup::Updated(start.actor.interpolate(
            &end.actor,
            start.timestamp,
            end.timestamp,
            timestamp,
        ))
    }

    /// Whether the actor exists at `timestamp`, judged by the oldest snapshot.
    pub fn is_created(&self, timestamp: i64) -> bool {
        timestamp >= self.oldest().actor.created()
    }

    /// Whether the actor is gone at `timestamp`, judged by the newest snapshot.
    pub fn is_destroyed(&self, timestamp: i64) -> bool {
        self.newest()
            .actor
            .destroyed()
            .is_some_and(|destroyed| timestamp >= destroyed)
    }

    /// Most recently recorded snapshot, without interpolation.
    pub fn last_known_actor(&self) -> &T {
        &self.newest().actor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Never true for a constructed history.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn oldest_timestamp(&self) -> i64 {
        self.oldest().timestamp
    }

    pub fn newest_timestamp(&self) -> i64 {
        self.newest().timestamp
    }

    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry<T>> {
        self.entries.iter()
    }

    fn oldest(&self) -> &Entry<T> {
        &self.entries[0]
    }

    fn newest(&self) -> &Entry<T> {
        &self.entries[self.entries.len() - 1]
    }
}

fn extrapolate_from<T: Timeline>(entry: &Entry<T>, timestamp: i64) -> T {
    let elapsed = (timestamp - entry.timestamp) as f32 / 1000.0;
    entry.actor.extrapolate(elapsed, timestamp)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        actor::{Actor, ActorConfig, ActorId},
        math::Vec2,
    };

    fn config() -> Arc<ActorConfig> {
        Arc::new(ActorConfig::mobile(1.0))
    }

    fn at(x: f32) -> Actor {
        Actor::new(ActorId(7), config(), 0, Vec2::new(x, 0.0), 0.0)
    }

    fn x_of(lookup: Lookup<Actor>) -> f32 {
        lookup.updated().expect("updated lookup").translation().x
    }

    #[test]
    fn single_entry_extrapolates_on_both_sides() {
        // Moving at 1 unit/s along +x, seeded at t=1000.
        let mut history = History::new(1000, at(10.0).with_moving(true), 1000);
        assert!((x_of(history.get(500, false)) - 9.5).abs() < 1e-5);
        assert!((x_of(history.get(1000, false)) - 10.0).abs() < 1e-5);
        assert!((x_of(history.get(1250, false)) - 10.25).abs() < 1e-5);
    }

    #[test]
    fn interpolates_between_bracketing_entries() {
        let mut history = History::new(0, at(0.0), 1000);
        history.record(100, at(10.0), true);
        history.record(200, at(20.0), true);
        history.record(300, at(30.0), true);
        assert_eq!(x_of(history.get(150, false)), 15.0);
        assert_eq!(x_of(history.get(275, false)), 27.5);
    }

    #[test]
    fn record_prunes_entries_outside_duration() {
        let mut history = History::new(0, at(0.0), 1000);
        for t in (100..=2500).step_by(100) {
            history.record(t, at(t as f32), true);
            assert!(history.entries().all(|e| e.timestamp >= t - 1000));
        }
        assert_eq!(history.oldest_timestamp(), 1500);
        assert_eq!(history.newest_timestamp(), 2500);
    }

    #[test]
    fn newest_entry_survives_zero_duration() {
        let mut history = History::new(0, at(0.0), 0);
        history.record(50, at(5.0), true);
        assert_eq!(history.len(), 1);
        assert_eq!(history.last_known_actor().translation().x, 5.0);
    }

    #[test]
    fn static_lookup_short_circuits_after_update_seen() {
        let mut history = History::new(0, at(0.0), 1000);
        assert!(matches!(history.get(0, true), Lookup::Updated(_)));
        history.record(100, at(0.0), false);
        assert_eq!(history.get(150, true), Lookup::Unchanged);
        // Non-static lookups are never skipped.
        assert!(matches!(history.get(150, false), Lookup::Updated(_)));
    }

    #[test]
    fn static_lookup_resumes_after_new_update() {
        let mut history = History::new(0, at(0.0), 1000);
        history.get(10, true);
        history.record(100, at(4.0), true);
        // Delayed time has not reached the update yet: keep producing states.
        assert!(matches!(history.get(50, true), Lookup::Updated(_)));
        assert!(matches!(history.get(100, true), Lookup::Updated(_)));
        assert_eq!(history.get(120, true), Lookup::Unchanged);
    }

    #[test]
    fn init_reseeds() {
        let mut history = History::new(0, at(0.0), 1000);
        history.record(100, at(1.0), true);
        history.get(200, true);
        history.init(500, at(9.0));
        assert_eq!(history.len(), 1);
        assert_eq!(history.last_update(), 500);
        assert_eq!(x_of(history.get(500, true)), 9.0);
    }

    #[test]
    fn lifecycle_queries_use_buffer_ends() {
        let config = config();
        let born = Actor::new(ActorId(1), config.clone(), 200, Vec2::ZERO, 0.0);
        let mut history = History::new(200, born.clone(), 1000);
        assert!(!history.is_created(199));
        assert!(history.is_created(200));
        assert!(!history.is_destroyed(10_000));

        let mut dying = born;
        dying.set_destroyed(400);
        history.record(400, dying, true);
        assert!(!history.is_destroyed(399));
        assert!(history.is_destroyed(400));
    }
}
