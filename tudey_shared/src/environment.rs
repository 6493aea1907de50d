//! Collision environment.
//!
//! Advancers consult an `Environment` for obstacle information. The core only
//! needs penetration and blocked-direction queries; the scene model behind
//! them is up to the implementation. `TileEnvironment` is the stock one,
//! backed by a tile map.

use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    actor::Actor,
    math::{Rect, Vec2},
    shape::TransformedShape,
};

bitflags::bitflags! {
    /// Cardinal directions in which an actor is blocked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Directions: u32 {
        const NORTH = 1 << 0; // +y
        const EAST = 1 << 1;  // +x
        const SOUTH = 1 << 2; // -y
        const WEST = 1 << 3;  // -x
    }
}

/// Collision queries used by advancers.
///
/// Implementations are shared by many advancers and called synchronously
/// within a tick.
pub trait Environment: Send + Sync {
    /// Translation that resolves the deepest overlap of `shape`, if any.
    fn penetration(&self, actor: &Actor, shape: &TransformedShape) -> Option<Vec2>;

    /// Whether `shape` overlaps anything the actor collides with.
    fn collides(&self, actor: &Actor, shape: &TransformedShape) -> bool {
        self.collides_mask(actor.config().collision_mask, shape)
    }

    /// Whether `shape` overlaps anything on the given layers.
    fn collides_mask(&self, mask: u32, shape: &TransformedShape) -> bool;

    /// Directions in which the actor is blocked.
    fn directions(&self, actor: &Actor, shape: &TransformedShape) -> Directions;

    /// Tile map the queries run against, when there is one.
    fn scene_model(&self) -> Option<&TileMap> {
        None
    }
}

/// Empty environment: nothing collides.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEnvironment;

impl Environment for NullEnvironment {
    fn penetration(&self, _actor: &Actor, _shape: &TransformedShape) -> Option<Vec2> {
        None
    }

    fn collides_mask(&self, _mask: u32, _shape: &TransformedShape) -> bool {
        false
    }

    fn directions(&self, _actor: &Actor, _shape: &TransformedShape) -> Directions {
        Directions::empty()
    }
}

/// Grid of unit tiles. Each tile holds a collision mask; zero is open floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMap {
    pub width: u32,
    pub height: u32,
    /// Row-major, `width * height` entries, row 0 at `y = 0`.
    pub tiles: Vec<u32>,
}

impl TileMap {
    /// All-floor map.
    pub fn open(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tiles: vec![0; width as usize * height as usize],
        }
    }

    /// Open map ringed by walls on layer 1.
    pub fn arena(width: u32, height: u32) -> Self {
        let mut map = Self::open(width, height);
        for x in 0..width {
            map.set(x, 0, 1);
            map.set(x, height.saturating_sub(1), 1);
        }
        for y in 0..height {
            map.set(0, y, 1);
            map.set(width.saturating_sub(1), y, 1);
        }
        map
    }

    /// Parses a map from JSON and checks its dimensions.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let map: TileMap = serde_json::from_str(s).context("parse tile map")?;
        let expected = u64::from(map.width).checked_mul(u64::from(map.height));
        if expected != Some(map.tiles.len() as u64) {
            bail!(
                "tile map has {} tiles, expected {}x{}",
                map.tiles.len(),
                map.width,
                map.height
            );
        }
        Ok(map)
    }

    /// Reads and parses a JSON map file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read map {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("load map {}", path.display()))
    }

    pub fn set(&mut self, x: u32, y: u32, mask: u32) {
        if x < self.width && y < self.height {
            self.tiles[y as usize * self.width as usize + x as usize] = mask;
        }
    }

    /// Collision mask at tile coordinates; outside the map is solid on all layers.
    pub fn get(&self, x: i64, y: i64) -> u32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return u32::MAX;
        }
        self.tiles[(y as u64 * self.width as u64 + x as u64) as usize]
    }

    /// Solid tiles on `mask` overlapping `bounds`.
    pub fn solid_tiles(&self, bounds: &Rect, mask: u32) -> impl Iterator<Item = Rect> + '_ {
        let x0 = bounds.min.x.floor() as i64;
        let x1 = bounds.max.x.floor() as i64;
        let y0 = bounds.min.y.floor() as i64;
        let y1 = bounds.max.y.floor() as i64;
        (y0..=y1)
            .flat_map(move |y| (x0..=x1).map(move |x| (x, y)))
            .filter(move |&(x, y)| self.get(x, y) & mask != 0)
            .map(|(x, y)| {
                let min = Vec2::new(x as f32, y as f32);
                Rect::new(min, min + Vec2::new(1.0, 1.0))
            })
    }
}

/// Distance used to probe for walls next to an actor.
const PROBE_DISTANCE: f32 = 0.01;

/// Environment backed by a tile map.
#[derive(Debug, Clone)]
pub struct TileEnvironment {
    map: TileMap,
}

impl TileEnvironment {
    pub fn new(map: TileMap) -> Self {
        debug!(width = map.width, height = map.height, "Tile environment created");
        Self { map }
    }

    pub fn map(&self) -> &TileMap {
        &self.map
    }
}

impl Environment for TileEnvironment {
    fn penetration(&self, actor: &Actor, shape: &TransformedShape) -> Option<Vec2> {
        self.map
            .solid_tiles(&shape.bounds(), actor.config().collision_mask)
            .filter_map(|tile| shape.penetration(&tile))
            .max_by(|a, b| a.len_sq().total_cmp(&b.len_sq()))
    }

    fn collides_mask(&self, mask: u32, shape: &TransformedShape) -> bool {
        self.map
            .solid_tiles(&shape.bounds(), mask)
            .any(|tile| shape.intersects(&tile))
    }

    fn directions(&self, actor: &Actor, shape: &TransformedShape) -> Directions {
        let probes = [
            (Directions::NORTH, Vec2::new(0.0, PROBE_DISTANCE)),
            (Directions::EAST, Vec2::new(PROBE_DISTANCE, 0.0)),
            (Directions::SOUTH, Vec2::new(0.0, -PROBE_DISTANCE)),
            (Directions::WEST, Vec2::new(-PROBE_DISTANCE, 0.0)),
        ];
        let mut blocked = Directions::empty();
        for (direction, offset) in probes {
            if self.collides(actor, &shape.translated(offset)) {
                blocked |= direction;
            }
        }
        blocked
    }

    fn scene_model(&self) -> Option<&TileMap> {
        Some(&self.map)
    }
}
