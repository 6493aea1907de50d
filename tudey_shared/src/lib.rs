//! `tudey_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic actor advancement (fixed substeps, stable ordering).
//! - Smooth display of remote actors from buffered snapshots.
//! - Traits for abstraction and dependency injection (environment, transport).
//! - No `unsafe`.

pub mod actor;
pub mod advancer;
pub mod config;
pub mod environment;
pub mod history;
pub mod input;
pub mod math;
pub mod net;
pub mod search;
pub mod shape;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::actor::*;
    pub use crate::advancer::*;
    pub use crate::config::*;
    pub use crate::environment::*;
    pub use crate::history::*;
    pub use crate::input::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::shape::*;
}
