//! Networked side of a launch
//!
//! # Architecture
//!
//! paralaunch uses a launcher-agent architecture:
//!
//! - **Launcher**: dispatches tests to agents and publishes one callback surface per group
//! - **Agent**: runs on each test host, starts workloads, reports their results
//! - **Workload**: the test process itself; talks to the callback surface for barriers
//!
//! # Modules
//!
//! - `protocol`: message definitions and framing
//! - `callback`: per-group callback server
//! - `agent`: dispatch seam, TCP dispatcher and the agent service
//! - `client`: workload-side callback client

pub mod agent;
pub mod callback;
pub mod client;
pub mod protocol;

pub use agent::{AgentClient, AgentService, DispatchFuture, Dispatcher};
pub use callback::CallbackServer;
pub use client::{CallbackClient, WorkloadEnv};
pub use protocol::{CallbackHandle, Message, RunTestMessage, PROTOCOL_VERSION};
