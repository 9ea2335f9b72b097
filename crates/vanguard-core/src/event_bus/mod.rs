//! EventBus - broadcast-based event system for engine state changes.
//!
//! The terminal registry and the orchestrators publish here; the real-time
//! layer pumps events into scenario rooms and onto observer connections.

/// Core event bus implementation (broadcast channel).
pub mod bus;
/// Event type definitions.
pub mod types;

pub use bus::EventBus;
pub use types::EngineEvent;

#[cfg(test)]
mod tests;
