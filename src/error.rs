//! Recoverable faults raised while dispatching a group
//!
//! Both kinds are local to a single test: the coordinator logs them, drops the
//! test from the wait set and carries on with the rest of the group.

use thiserror::Error;

/// Failure to hand a test over to its agent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("cannot resolve agent reference '{reference}': group has {available} agent(s)")]
    UnresolvedAgent { reference: String, available: usize },

    #[error("agent {0} unreachable: {1}")]
    Unreachable(String, String),

    #[error("agent {agent} rejected test: {reason}")]
    Rejected { agent: String, reason: String },

    #[error("protocol error talking to {0}: {1}")]
    Protocol(String, String),

    #[error("dispatch to {0} timed out after {1}ms")]
    Timeout(String, u64),
}

/// Malformed test parameters, detected before dispatch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("parameter {index} ('{raw}') is not in key=value form")]
    Malformed { index: usize, raw: String },

    #[error("parameter {index} uses unrecognized key '{key}'")]
    UnrecognizedKey { index: usize, key: String },

    #[error("parameter key '{0}' given more than once")]
    DuplicateKey(String),

    #[error("expected {expected} parameters, got {actual}")]
    WrongCount { expected: usize, actual: usize },
}
