//! Rendezvous points for distributed workloads
//!
//! Dispatched tests synchronize with each other through named barriers kept
//! by their group's coordinator.
//!
//! # Modules
//!
//! - `barrier`: counting barrier with forced abandonment
//! - `registry`: per-group barrier map and derivation of barrier sizes

pub mod barrier;
pub mod registry;

use serde::{Deserialize, Serialize};

pub use barrier::Barrier;
pub use registry::RendezvousRegistry;

/// Group-wide checkpoint every test passes before starting its real work
pub const READY_BARRIER: &str = "ready";

/// Group-wide checkpoint every test passes before finishing
pub const DONE_BARRIER: &str = "done";

/// Why a barrier entrant was woken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarrierOutcome {
    /// The full cohort arrived
    Released,
    /// The barrier can no longer fill up; stop waiting
    Abandoned,
}

/// Observable state of a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierStatus {
    /// Accepting entrants for the current cohort
    Open,
    /// Last cohort was released and nobody is parked
    Released,
    /// Terminally abandoned
    Abandoned,
}
