//! Agent side of dispatch
//!
//! [`Dispatcher`] is the seam the group coordinator dispatches through.
//! [`AgentClient`] implements it over TCP; [`AgentService`] is the process
//! that runs on each agent host, accepts `RunTest` requests, runs the
//! workload as a child process and reports its result back to the group's
//! callback surface.

use crate::config::LauncherSettings;
use crate::distributed::client::{self, CallbackClient};
use crate::distributed::protocol::*;
use crate::error::DispatchError;
use crate::stats::TestResult;
use anyhow::{Context, Result};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Boxed dispatch future, so the trait stays object safe
pub type DispatchFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;

/// Hands a test to the agent at `agent`
///
/// Resolves once the agent has accepted or refused the request; the result
/// arrives later through the callback surface.
pub trait Dispatcher: Send + Sync {
    fn dispatch<'a>(&'a self, agent: &'a str, request: &'a RunTestMessage) -> DispatchFuture<'a>;
}

/// TCP dispatcher talking to [`AgentService`] instances
#[derive(Debug, Clone)]
pub struct AgentClient {
    timeout: Duration,
}

impl AgentClient {
    pub fn new(dispatch_timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(dispatch_timeout_ms),
        }
    }

    pub fn from_settings(settings: &LauncherSettings) -> Self {
        Self::new(settings.dispatch_timeout_ms)
    }

    async fn run_test(&self, agent: &str, request: &RunTestMessage) -> Result<(), DispatchError> {
        let mut stream = TcpStream::connect(agent).await
            .map_err(|e| DispatchError::Unreachable(agent.to_string(), e.to_string()))?;

        write_message(&mut stream, &Message::RunTest(request.clone())).await
            .map_err(|e| DispatchError::Protocol(agent.to_string(), format!("{:#}", e)))?;

        let reply = read_message(&mut stream).await
            .map_err(|e| DispatchError::Protocol(agent.to_string(), format!("{:#}", e)))?;

        match reply {
            Message::DispatchAccepted(accepted) => {
                debug!(agent, agent_id = %accepted.agent_id, test = %accepted.test_name, "Dispatch accepted");
                Ok(())
            }
            Message::DispatchRejected(rejected) => Err(DispatchError::Rejected {
                agent: format!("{} ({})", agent, rejected.agent_id),
                reason: rejected.reason,
            }),
            Message::Error(err) => Err(DispatchError::Rejected {
                agent: agent.to_string(),
                reason: err.error,
            }),
            other => Err(DispatchError::Protocol(
                agent.to_string(),
                format!("expected DISPATCH_ACCEPTED, got {}", other.kind()),
            )),
        }
    }
}

impl Dispatcher for AgentClient {
    fn dispatch<'a>(&'a self, agent: &'a str, request: &'a RunTestMessage) -> DispatchFuture<'a> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.run_test(agent, request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(DispatchError::Timeout(
                    agent.to_string(),
                    self.timeout.as_millis() as u64,
                )),
            }
        })
    }
}

/// Agent service
///
/// Runs on each agent host, accepting tests from any launcher.
pub struct AgentService {
    /// Port to listen on
    listen_port: u16,

    /// Agent identifier (hostname)
    agent_id: String,
}

impl AgentService {
    pub fn new(listen_port: u16) -> Self {
        Self {
            listen_port,
            agent_id: get_agent_id(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Bind the listen port and serve forever
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.listen_port);
        let listener = TcpListener::bind(&addr).await
            .with_context(|| format!("Failed to bind agent service on {}", addr))?;

        self.serve(listener).await
    }

    /// Serve `RunTest` requests arriving on `listener`
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()
            .context("Failed to read agent service address")?;
        info!(agent_id = %self.agent_id, %local_addr, "Agent service listening");

        let agent_id: std::sync::Arc<str> = self.agent_id.into();
        loop {
            let (stream, peer) = listener.accept().await
                .context("Failed to accept connection")?;
            debug!(%peer, "Launcher connected");

            let agent_id = agent_id.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &agent_id).await {
                    warn!(%peer, "Dispatch request failed: {:#}", e);
                }
            });
        }
    }
}

async fn handle_connection(mut stream: TcpStream, agent_id: &str) -> Result<()> {
    let request = match read_message(&mut stream).await? {
        Message::RunTest(request) => request,
        other => {
            let reply = Message::error(format!("Expected RUN_TEST, got {}", other.kind()));
            write_message(&mut stream, &reply).await?;
            anyhow::bail!("Unexpected {} from launcher", other.kind());
        }
    };

    if let Some(reason) = refusal_reason(&request) {
        warn!(test = %request.test_name, "Rejecting test: {}", reason);
        let reply = Message::DispatchRejected(DispatchRejectedMessage {
            agent_id: agent_id.to_string(),
            test_name: request.test_name.clone(),
            reason,
        });
        return write_message(&mut stream, &reply).await;
    }

    let reply = Message::DispatchAccepted(DispatchAcceptedMessage {
        agent_id: agent_id.to_string(),
        test_name: request.test_name.clone(),
    });
    write_message(&mut stream, &reply).await?;
    drop(stream);

    info!(
        test = %request.test_name,
        group = %request.callback.group,
        assembly = %request.assembly,
        "Running test"
    );

    let result = execute(&request).await;
    if let Err(e) = report(&request, result).await {
        error!(test = %request.test_name, "Could not deliver result: {:#}", e);
    }
    Ok(())
}

fn refusal_reason(request: &RunTestMessage) -> Option<String> {
    if request.protocol_version != PROTOCOL_VERSION {
        return Some(format!(
            "Protocol version mismatch: launcher={}, agent={}",
            request.protocol_version, PROTOCOL_VERSION
        ));
    }
    if !Path::new(&request.assembly).exists() {
        return Some(format!("Workload {} not found", request.assembly));
    }
    None
}

/// Run the workload to completion and turn its exit into a result
async fn execute(request: &RunTestMessage) -> TestResult {
    let start = Instant::now();
    let output = Command::new(&request.assembly)
        .arg(&request.test_to_run)
        .args(&request.params)
        .env(client::ENV_CALLBACK, &request.callback.address)
        .env(client::ENV_GROUP, &request.callback.group)
        .env(client::ENV_TEST, &request.test_name)
        .env(client::ENV_START_BARRIER, &request.start_barrier)
        .env(client::ENV_END_BARRIER, &request.end_barrier)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            build_result(
                &request.test_name,
                output.status.success(),
                &output.status.to_string(),
                &stdout,
                &stderr,
                start.elapsed().as_secs_f64(),
            )
        }
        Err(e) => {
            warn!(test = %request.test_name, "Failed to spawn {}: {}", request.assembly, e);
            TestResult::not_executed(
                &request.test_name,
                format!("failed to spawn {}: {}", request.assembly, e),
            )
        }
    }
}

fn build_result(
    test_name: &str,
    success: bool,
    status: &str,
    stdout: &str,
    stderr: &str,
    elapsed_seconds: f64,
) -> TestResult {
    let assert_count = parse_assert_count(stdout);
    if success {
        return TestResult::success(test_name, elapsed_seconds).with_assert_count(assert_count);
    }

    let message = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());

    TestResult::failure(test_name, message, stderr.trim_end(), elapsed_seconds)
        .with_assert_count(assert_count)
}

/// Last `ASSERTS=<n>` line on stdout, 0 if none
fn parse_assert_count(stdout: &str) -> u32 {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("ASSERTS=")?.trim().parse().ok())
        .unwrap_or(0)
}

async fn report(request: &RunTestMessage, result: TestResult) -> Result<()> {
    let mut client = CallbackClient::connect(&request.callback).await?;
    client.notify_result(&request.test_name, result).await
}

/// Get agent identifier (hostname)
fn get_agent_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
