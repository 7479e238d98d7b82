//! Coordinator module
//!
//! Group coordinators and the sequencer that runs them one group at a time.

pub mod group;
pub mod sequencer;
pub mod session;

pub use group::GroupCoordinator;
pub use sequencer::{GroupReport, PlanReport, Sequencer};
pub use session::DispatchSession;
