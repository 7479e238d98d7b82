//! Group coordinator
//!
//! Runs one group on a dedicated thread: publishes the group's callback
//! surface, provisions its barriers, dispatches every test to its agent and
//! waits until each launched test has reported.

use super::DispatchSession;
use crate::config::validator::parse_parameters;
use crate::config::{with_default_port, Group, LauncherSettings, ParameterPolicy, TestSpec};
use crate::distributed::protocol::{CallbackHandle, RunTestMessage, PROTOCOL_VERSION};
use crate::distributed::{CallbackServer, Dispatcher};
use crate::stats::TestResult;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Coordinator of one group's dispatch session
pub struct GroupCoordinator {
    group: Arc<Group>,
    settings: Arc<LauncherSettings>,
    policy: Arc<ParameterPolicy>,
    dispatcher: Arc<dyn Dispatcher>,
    session: Option<Arc<DispatchSession>>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl GroupCoordinator {
    pub fn new(
        group: Group,
        settings: Arc<LauncherSettings>,
        policy: Arc<ParameterPolicy>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            group: Arc::new(group),
            settings,
            policy,
            dispatcher,
            session: None,
            worker: None,
        }
    }

    pub fn group_name(&self) -> &str {
        &self.group.name
    }

    /// Session of the running group; `None` before start or for an empty group
    pub fn session(&self) -> Option<&Arc<DispatchSession>> {
        self.session.as_ref()
    }

    /// Spawn the coordinator thread and return immediately
    ///
    /// A group without tests is logged and never gets a session.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() || self.session.is_some() {
            anyhow::bail!("Group {} already started", self.group.name);
        }

        if self.group.tests.is_empty() {
            error!(group = %self.group.name, "Group has no tests; skipping");
            return Ok(());
        }

        let session = Arc::new(DispatchSession::new(
            self.group.name.clone(),
            self.group.tests.len(),
        ));
        self.session = Some(session.clone());

        let group = self.group.clone();
        let settings = self.settings.clone();
        let policy = self.policy.clone();
        let dispatcher = self.dispatcher.clone();

        let handle = thread::Builder::new()
            .name(format!("group-{}", self.group.name))
            .spawn(move || run_group(&group, &settings, &policy, dispatcher.as_ref(), session))
            .with_context(|| {
                format!("Failed to spawn coordinator thread for group {}", self.group.name)
            })?;

        self.worker = Some(handle);
        Ok(())
    }

    /// Block until the coordinator thread has returned
    pub fn join(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| {
                anyhow::anyhow!("Coordinator thread for group {} panicked", self.group.name)
            })?,
            None => Ok(()),
        }
    }

    /// Results received so far
    pub fn results(&self) -> Vec<TestResult> {
        self.session
            .as_ref()
            .map(|session| session.aggregator().results())
            .unwrap_or_default()
    }
}

/// Coordinator thread body
fn run_group(
    group: &Group,
    settings: &LauncherSettings,
    policy: &ParameterPolicy,
    dispatcher: &dyn Dispatcher,
    session: Arc<DispatchSession>,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name(format!("{}-callback", group.name))
        .build()
        .context("Failed to create tokio runtime")?;

    let completion = session
        .aggregator()
        .completion()
        .context("Completion signal already taken")?;

    let bind_addr = format!("{}:{}", settings.bind_address, settings.callback_port);
    let server = runtime.block_on(CallbackServer::bind(&bind_addr, session.clone()))?;

    let handle = CallbackHandle {
        address: format!("{}:{}", advertised_host(settings), server.local_addr().port()),
        group: group.name.clone(),
    };

    let sizes = session.registry().provision(&group.tests);
    debug!(group = %group.name, barriers = ?sizes, "Provisioned barriers");

    info!(
        group = %group.name,
        tests = group.tests.len(),
        callback = %handle.address,
        "Dispatching group"
    );

    for test in &group.tests {
        let dispatched = dispatch_test(
            group, test, settings, policy, dispatcher, &session, &handle, &runtime,
        );
        if let Err(reason) = dispatched {
            warn!(group = %group.name, test = %test.name, "Test excluded: {}", reason);
            let abandoned = session.registry().abandon_barriers_of(&test.name);
            if !abandoned.is_empty() {
                debug!(
                    group = %group.name,
                    test = %test.name,
                    barriers = ?abandoned,
                    "Abandoned barriers of excluded test"
                );
            }
        }
    }

    let aggregator = session.aggregator();
    aggregator.seal();
    info!(
        group = %group.name,
        launched = aggregator.launched_count(),
        received = aggregator.received_count(),
        "Dispatch loop finished, waiting for results"
    );

    let completed = runtime.block_on(async {
        match settings.result_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), completion)
                .await
                .is_ok(),
            None => {
                warn!(
                    group = %group.name,
                    "No result timeout configured; waiting for every launched test"
                );
                let _ = completion.await;
                true
            }
        }
    });

    if !completed {
        warn!(
            group = %group.name,
            missing = ?aggregator.missing(),
            "Result timeout expired; abandoning every barrier"
        );
        session.registry().abandon_all();
    }

    for (barrier, status, releases) in session.registry().snapshot() {
        debug!(group = %group.name, %barrier, ?status, releases, "Barrier state at group end");
    }

    runtime.block_on(async {
        tokio::time::sleep(Duration::from_millis(settings.drain_grace_ms)).await;
        server.shutdown().await;
    });
    runtime.shutdown_timeout(Duration::from_secs(1));

    info!(
        group = %group.name,
        received = aggregator.received_count(),
        launched = aggregator.launched_count(),
        "Group finished"
    );
    Ok(())
}

/// Resolve, validate and dispatch one test; `Err` carries the exclusion reason
#[allow(clippy::too_many_arguments)]
fn dispatch_test(
    group: &Group,
    test: &TestSpec,
    settings: &LauncherSettings,
    policy: &ParameterPolicy,
    dispatcher: &dyn Dispatcher,
    session: &DispatchSession,
    handle: &CallbackHandle,
    runtime: &tokio::runtime::Runtime,
) -> Result<(), String> {
    let agent = group
        .resolve_machine(&test.machine)
        .map(|addr| with_default_port(&addr, settings.agent_port))
        .map_err(|e| e.to_string())?;

    let params = parse_parameters(&test.params, policy).map_err(|e| e.to_string())?;
    debug!(test = %test.name, %agent, params = params.len(), "Parameters accepted");

    let request = RunTestMessage {
        protocol_version: PROTOCOL_VERSION,
        test_name: test.name.clone(),
        assembly: test.assembly.clone(),
        test_to_run: test.test_to_run.clone(),
        params: test.params.clone(),
        start_barrier: test.start_barrier.trim().to_string(),
        end_barrier: test.end_barrier.trim().to_string(),
        callback: handle.clone(),
    };

    let aggregator = session.aggregator();
    aggregator.begin_dispatch(&test.name);

    match runtime.block_on(dispatcher.dispatch(&agent, &request)) {
        Ok(()) => {
            info!(group = %group.name, test = %test.name, %agent, "Dispatched");
            Ok(())
        }
        Err(e) => {
            aggregator.dispatch_failed(&test.name);
            Err(e.to_string())
        }
    }
}

/// Host agents should use to reach this launcher
fn advertised_host(settings: &LauncherSettings) -> String {
    if let Some(host) = settings.callback_host.as_deref().filter(|h| !h.is_empty()) {
        return host.to_string();
    }
    if settings.bind_address != "0.0.0.0" && settings.bind_address != "::" {
        return settings.bind_address.clone();
    }
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
