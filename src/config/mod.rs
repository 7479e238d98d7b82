//! Configuration module
//!
//! Test plan model, CLI argument parsing, TOML plan files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::net::{Ipv6Addr, SocketAddr};

/// Prefix of a symbolic agent reference (`_AGENT1` is the group's first agent)
pub const AGENT_PREFIX: &str = "_AGENT";

/// Complete test plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
    #[serde(default)]
    pub launcher: LauncherSettings,
    #[serde(default)]
    pub parameters: ParameterPolicy,
    #[serde(default)]
    pub groups: Vec<Group>,
}

/// Launcher-wide settings shared by every group coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherSettings {
    /// Address agents use to reach the callback server (defaults to hostname)
    pub callback_host: Option<String>,
    /// Local address the callback server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Callback port; 0 picks an ephemeral port per group
    #[serde(default)]
    pub callback_port: u16,
    /// Port appended to agent addresses that lack one
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    /// Grace period between group completion and callback server shutdown
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
    /// Upper bound for connecting to an agent and reading its dispatch reply
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    /// Optional bound on the wait for all results; unset waits forever
    #[serde(default)]
    pub result_timeout_secs: Option<u64>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            callback_host: None,
            bind_address: default_bind_address(),
            callback_port: 0,
            agent_port: default_agent_port(),
            drain_grace_ms: default_drain_grace_ms(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            result_timeout_secs: None,
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_agent_port() -> u16 {
    8090
}

fn default_drain_grace_ms() -> u64 {
    500
}

fn default_dispatch_timeout_ms() -> u64 {
    10_000
}

/// Recognized test parameters
///
/// An empty `accepted` list admits any well-formed key. `required` pins the
/// exact number of parameters a test must carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterPolicy {
    #[serde(default)]
    pub accepted: Vec<String>,
    #[serde(default)]
    pub required: Option<usize>,
}

/// A set of tests that run together and may synchronize with each other
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

impl Group {
    /// Resolve a test's machine reference to a literal address
    ///
    /// `_AGENTn` is a 1-based index into the group's agent list; anything else
    /// is taken as a literal address.
    pub fn resolve_machine(&self, machine: &str) -> Result<String, DispatchError> {
        let Some(index) = machine.strip_prefix(AGENT_PREFIX) else {
            return Ok(machine.to_string());
        };

        let unresolved = || DispatchError::UnresolvedAgent {
            reference: machine.to_string(),
            available: self.agents.len(),
        };

        let index: usize = index.parse().map_err(|_| unresolved())?;
        if index == 0 {
            return Err(unresolved());
        }
        self.agents.get(index - 1).cloned().ok_or_else(unresolved)
    }
}

/// One test's dispatch descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    /// Literal `host[:port]` or a symbolic `_AGENTn` reference
    pub machine: String,
    /// Workload executable on the agent host
    pub assembly: String,
    /// Entry point inside the workload
    pub test_to_run: String,
    /// Ordered `key=value` parameters
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub start_barrier: String,
    #[serde(default)]
    pub end_barrier: String,
}

impl TestSpec {
    /// Barrier names this test declared, skipping empty slots
    pub fn declared_barriers(&self) -> impl Iterator<Item = &str> {
        [self.start_barrier.trim(), self.end_barrier.trim()]
            .into_iter()
            .filter(|name| !name.is_empty())
    }
}

/// Append `default_port` to an address that has none
///
/// IPv6 literals are accepted bare (`fe80::1`), bracketed (`[fe80::1]`) or
/// with a port (`[fe80::1]:9000`).
pub fn with_default_port(addr: &str, default_port: u16) -> String {
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }
    if let Ok(v6) = addr.parse::<Ipv6Addr>() {
        return SocketAddr::from((v6, default_port)).to_string();
    }
    if addr.starts_with('[') && addr.ends_with(']') {
        return format!("{}:{}", addr, default_port);
    }
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{}:{}", addr, default_port)
    }
}

#[cfg(test)]
pub(crate) fn test_spec(name: &str, machine: &str) -> TestSpec {
    TestSpec {
        name: name.to_string(),
        machine: machine.to_string(),
        assembly: "/opt/tests/workload".to_string(),
        test_to_run: format!("Suite.{}", name),
        params: Vec::new(),
        start_barrier: String::new(),
        end_barrier: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Group {
        Group {
            name: "G1".to_string(),
            agents: vec!["10.0.1.10:8090".to_string(), "10.0.1.11".to_string()],
            tests: vec![],
        }
    }

    #[test]
    fn test_resolve_symbolic_agent() {
        let g = group();
        assert_eq!(g.resolve_machine("_AGENT1").unwrap(), "10.0.1.10:8090");
        assert_eq!(g.resolve_machine("_AGENT2").unwrap(), "10.0.1.11");
    }

    #[test]
    fn test_resolve_literal_address() {
        assert_eq!(group().resolve_machine("box:9000").unwrap(), "box:9000");
    }

    #[test]
    fn test_resolve_out_of_range() {
        let g = group();
        assert!(matches!(
            g.resolve_machine("_AGENT3"),
            Err(DispatchError::UnresolvedAgent { available: 2, .. })
        ));
        assert!(g.resolve_machine("_AGENT0").is_err());
        assert!(g.resolve_machine("_AGENTx").is_err());
    }

    #[test]
    fn test_declared_barriers_skip_empty() {
        let mut spec = test_spec("client", "_AGENT1");
        assert_eq!(spec.declared_barriers().count(), 0);

        spec.start_barrier = "ready".to_string();
        spec.end_barrier = "  ".to_string();
        assert_eq!(spec.declared_barriers().collect::<Vec<_>>(), vec!["ready"]);
    }

    #[test]
    fn test_with_default_port() {
        assert_eq!(with_default_port("10.0.1.10", 8090), "10.0.1.10:8090");
        assert_eq!(with_default_port("10.0.1.10:9", 8090), "10.0.1.10:9");
        assert_eq!(with_default_port("agent-3", 8090), "agent-3:8090");
        assert_eq!(with_default_port("agent-3:7000", 8090), "agent-3:7000");
    }

    #[test]
    fn test_with_default_port_ipv6() {
        assert_eq!(with_default_port("fe80::1", 8090), "[fe80::1]:8090");
        assert_eq!(with_default_port("::1", 8090), "[::1]:8090");
        assert_eq!(with_default_port("[fe80::1]", 8090), "[fe80::1]:8090");
        assert_eq!(with_default_port("[fe80::1]:9000", 8090), "[fe80::1]:9000");
    }
}
