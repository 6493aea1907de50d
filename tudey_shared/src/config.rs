//! Configuration system.
//!
//! Loads simulation configuration from JSON strings/files.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::environment::TileMap;

/// Size of the walled arena used when no map is configured.
pub const DEFAULT_ARENA_WIDTH: u32 = 32;
pub const DEFAULT_ARENA_HEIGHT: u32 = 24;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Fixed simulation tick rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub advancer: AdvancerConfig,
    /// Tile map JSON; the built-in arena is used when absent.
    #[serde(default)]
    pub map_path: Option<String>,
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_tick_hz() -> u32 {
    20
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            history: HistoryConfig::default(),
            advancer: AdvancerConfig::default(),
            map_path: None,
        }
    }
}

impl SimConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Milliseconds per server tick.
    pub fn tick_ms(&self) -> i64 {
        1000 / i64::from(self.tick_hz.max(1))
    }

    /// The configured tile map, or the built-in arena.
    pub fn tile_map(&self) -> anyhow::Result<TileMap> {
        match &self.map_path {
            Some(path) => TileMap::load(path),
            None => Ok(TileMap::arena(DEFAULT_ARENA_WIDTH, DEFAULT_ARENA_HEIGHT)),
        }
    }
}

/// Buffering of remote actors on clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// How long snapshots are retained (ms).
    #[serde(default = "default_history_duration")]
    pub duration_ms: i64,
    /// How far behind the current time remote actors are displayed (ms).
    #[serde(default = "default_buffer_delay")]
    pub buffer_delay_ms: i64,
}

fn default_history_duration() -> i64 {
    1000
}

fn default_buffer_delay() -> i64 {
    100
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_history_duration(),
            buffer_delay_ms: default_buffer_delay(),
        }
    }
}

/// Advancer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdvancerConfig {
    /// Longest integration substep (seconds).
    #[serde(default = "default_max_substep")]
    pub max_substep: f32,
    /// Penetration corrections tried before a substep is reverted. Zero
    /// disables collision correction.
    #[serde(default = "default_penetration_attempts")]
    pub penetration_attempts: u32,
    /// Scale applied to penetration vectors so corrected shapes clear contact.
    #[serde(default = "default_penetration_overshoot")]
    pub penetration_overshoot: f32,
}

fn default_max_substep() -> f32 {
    1.0 / 60.0
}

fn default_penetration_attempts() -> u32 {
    3
}

fn default_penetration_overshoot() -> f32 {
    1.001
}

impl Default for AdvancerConfig {
    fn default() -> Self {
        Self {
            max_substep: default_max_substep(),
            penetration_attempts: default_penetration_attempts(),
            penetration_overshoot: default_penetration_overshoot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let cfg = SimConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, SimConfig::default());
        assert_eq!(cfg.advancer.penetration_attempts, 3);
        assert_eq!(cfg.history.duration_ms, 1000);
        assert_eq!(cfg.tick_ms(), 50);
    }

    #[test]
    fn nested_sections_override_selectively() {
        let cfg = SimConfig::from_json_str(
            r#"{
                "tick_hz": 30,
                "history": { "buffer_delay_ms": 150 },
                "advancer": { "penetration_attempts": 5 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.history.buffer_delay_ms, 150);
        assert_eq!(cfg.history.duration_ms, 1000);
        assert_eq!(cfg.advancer.penetration_attempts, 5);
        assert_eq!(cfg.advancer.max_substep, 1.0 / 60.0);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SimConfig::load("does/not/exist.json").unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }

    #[test]
    fn tile_map_falls_back_to_arena() {
        let map = SimConfig::default().tile_map().unwrap();
        assert_eq!((map.width, map.height), (DEFAULT_ARENA_WIDTH, DEFAULT_ARENA_HEIGHT));
        assert_eq!(map.get(0, 0), 1);
        assert_eq!(map.get(5, 5), 0);

        let missing = SimConfig {
            map_path: Some("does/not/exist.json".into()),
            ..Default::default()
        };
        assert!(format!("{:#}", missing.tile_map().unwrap_err()).contains("read map"));
    }
}
