//! Client-side sensor state synchronization engine.
//!
//! Ingests an unordered stream of partial sensor updates from the push
//! channel, reconciles it with locally-initiated connect/disconnect commands
//! (optimistic, last merge wins), and exposes one consistent filterable view
//! of sensor state through [`engine::EngineHandle`].

pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod projector;
pub mod registry;
pub mod transport;
