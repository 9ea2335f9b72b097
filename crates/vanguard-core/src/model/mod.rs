//! Scenario, attack and campaign records
//!
//! These are the records the engine reads and writes through [`crate::Store`].
//! Field names serialize in camelCase so records can be handed to observers
//! unchanged.

mod campaign;
mod scenario;
mod status;

#[cfg(test)]
mod tests;

pub use campaign::{Campaign, ExecutionProgress, ProgressDelta};
pub use scenario::{Attack, Scenario, Target, ATTACK_OUTPUT_CAP};
pub use status::{CampaignStatus, RunStatus};
