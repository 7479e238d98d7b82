//! paralaunch - distributed launcher for parallel test groups
//!
//! paralaunch dispatches groups of test workloads to agents on remote hosts,
//! lets the running workloads rendezvous at named barriers and collects
//! their results into a per-group and overall report.
//!
//! # Architecture
//!
//! - **Sequencer**: runs the plan's groups strictly one after another
//! - **Group coordinator**: dispatches one group on its own thread and waits for every result
//! - **Rendezvous registry**: counting barriers with forced abandonment
//! - **Result aggregator**: collects reports and fires a one-shot completion signal
//! - **Agent**: accepts dispatched tests on each host and runs the workloads

pub mod config;
pub mod coordinator;
pub mod distributed;
pub mod error;
pub mod output;
pub mod rendezvous;
pub mod stats;

// Re-export commonly used types
pub use config::TestPlan;
pub use coordinator::{GroupCoordinator, Sequencer};
pub use error::{DispatchError, ValidationError};

/// Result type used throughout paralaunch
pub type Result<T> = anyhow::Result<T>;
