//! Workload-side client of a group's callback surface
//!
//! A dispatched workload (or the agent acting for it) uses this client to
//! declare barriers, wait on them and report its final result. The agent
//! passes the callback reference down through `PARALAUNCH_*` environment
//! variables so that `from_env` can rebuild it inside the child process.

use crate::distributed::protocol::*;
use crate::rendezvous::BarrierOutcome;
use crate::stats::TestResult;
use anyhow::{Context, Result};
use tokio::net::TcpStream;

/// `host:port` of the group's callback server
pub const ENV_CALLBACK: &str = "PARALAUNCH_CALLBACK";
/// Group the workload belongs to
pub const ENV_GROUP: &str = "PARALAUNCH_GROUP";
/// Name of the running test
pub const ENV_TEST: &str = "PARALAUNCH_TEST";
/// Barrier to pass before the test body (may be empty)
pub const ENV_START_BARRIER: &str = "PARALAUNCH_START_BARRIER";
/// Barrier to pass after the test body (may be empty)
pub const ENV_END_BARRIER: &str = "PARALAUNCH_END_BARRIER";

/// Connection to one group's callback server
pub struct CallbackClient {
    stream: TcpStream,
    group: String,
}

/// Callback reference and identity recovered from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEnv {
    pub handle: CallbackHandle,
    pub test_name: String,
    pub start_barrier: String,
    pub end_barrier: String,
}

impl WorkloadEnv {
    /// Read the variables the agent sets for every workload
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .with_context(|| format!("{} is not set; not running under a paralaunch agent?", key))
        };

        Ok(Self {
            handle: CallbackHandle {
                address: required(ENV_CALLBACK)?,
                group: required(ENV_GROUP)?,
            },
            test_name: required(ENV_TEST)?,
            start_barrier: lookup(ENV_START_BARRIER).unwrap_or_default(),
            end_barrier: lookup(ENV_END_BARRIER).unwrap_or_default(),
        })
    }
}

impl CallbackClient {
    /// Connect to the callback server named by `handle`
    pub async fn connect(handle: &CallbackHandle) -> Result<Self> {
        let stream = TcpStream::connect(&handle.address).await
            .with_context(|| format!("Failed to connect to callback server at {}", handle.address))?;
        stream.set_nodelay(true)
            .context("Failed to set TCP_NODELAY")?;

        Ok(Self {
            stream,
            group: handle.group.clone(),
        })
    }

    /// Connect using the agent-provided environment
    pub async fn from_env() -> Result<(Self, WorkloadEnv)> {
        let env = WorkloadEnv::from_env()?;
        let client = Self::connect(&env.handle).await?;
        Ok((client, env))
    }

    /// Report the final result of `test_name`
    pub async fn notify_result(&mut self, test_name: &str, result: TestResult) -> Result<()> {
        let request = Message::NotifyResult(NotifyResultMessage {
            protocol_version: PROTOCOL_VERSION,
            group: self.group.clone(),
            test_name: test_name.to_string(),
            result,
        });
        self.expect_ack(request).await
            .with_context(|| format!("NotifyResult for {} failed", test_name))
    }

    /// Declare that `test_name` will enter `barrier`
    pub async fn init_barrier(&mut self, test_name: &str, barrier: &str, required: Option<usize>) -> Result<()> {
        let request = Message::InitBarrier(InitBarrierMessage {
            protocol_version: PROTOCOL_VERSION,
            group: self.group.clone(),
            test_name: test_name.to_string(),
            barrier: barrier.to_string(),
            required,
        });
        self.expect_ack(request).await
            .with_context(|| format!("InitBarrier {} failed", barrier))
    }

    /// Declare a barrier sized for the whole group
    pub async fn init_barrier_default(&mut self, test_name: &str, barrier: &str) -> Result<()> {
        self.init_barrier(test_name, barrier, None).await
    }

    /// Enter `barrier` and wait until it is released or abandoned
    pub async fn enter_barrier(&mut self, barrier: &str) -> Result<BarrierOutcome> {
        let request = Message::EnterBarrier(EnterBarrierMessage {
            protocol_version: PROTOCOL_VERSION,
            group: self.group.clone(),
            barrier: barrier.to_string(),
        });

        match self.call(request).await? {
            Message::BarrierReply(reply) if reply.barrier == barrier => Ok(reply.outcome),
            Message::BarrierReply(reply) => {
                anyhow::bail!("Reply for barrier {} while waiting on {}", reply.barrier, barrier)
            }
            Message::Error(err) => anyhow::bail!("EnterBarrier {} refused: {}", barrier, err.error),
            other => anyhow::bail!("Expected BARRIER_REPLY, got {}", other.kind()),
        }
    }

    async fn expect_ack(&mut self, request: Message) -> Result<()> {
        match self.call(request).await? {
            Message::Ack => Ok(()),
            Message::Error(err) => anyhow::bail!("Refused by launcher: {}", err.error),
            other => anyhow::bail!("Expected ACK, got {}", other.kind()),
        }
    }

    async fn call(&mut self, request: Message) -> Result<Message> {
        write_message(&mut self.stream, &request).await?;
        read_message(&mut self.stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_env_round_trip() {
        let env = WorkloadEnv::from_lookup(lookup(&[
            (ENV_CALLBACK, "10.0.0.5:40000"),
            (ENV_GROUP, "G1"),
            (ENV_TEST, "server"),
            (ENV_START_BARRIER, "ready"),
        ]))
        .unwrap();

        assert_eq!(env.handle.address, "10.0.0.5:40000");
        assert_eq!(env.handle.group, "G1");
        assert_eq!(env.test_name, "server");
        assert_eq!(env.start_barrier, "ready");
        assert_eq!(env.end_barrier, "");
    }

    #[test]
    fn test_env_missing_callback() {
        let err = WorkloadEnv::from_lookup(lookup(&[(ENV_GROUP, "G1"), (ENV_TEST, "a")])).unwrap_err();
        assert!(err.to_string().contains(ENV_CALLBACK));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let handle = CallbackHandle { address, group: "G1".to_string() };
        assert!(CallbackClient::connect(&handle).await.is_err());
    }
}
