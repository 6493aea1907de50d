//! `tudey_server`
//!
//! Server-side systems:
//! - Authoritative scene: every actor stepped by an advancer
//! - Fixed tick loop
//! - Receives input frames
//! - Sends scene ticks
//!
//! Networking model:
//! - UDP only: handshake, input and replication share one socket

pub mod scene;
pub mod server;

pub use scene::SceneServer;
pub use server::GameServer;
