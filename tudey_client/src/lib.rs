//! `tudey_client`
//!
//! Client-side systems:
//! - Connection management over a `Transport`
//! - Input sampling into input frames
//! - Prediction of the controlled pawn
//! - Buffered interpolation of remote actors

pub mod client;
pub mod input;
pub mod view;

pub use client::GameClient;
pub use view::SceneView;
