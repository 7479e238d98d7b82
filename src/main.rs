//! paralaunch CLI entry point

use anyhow::{Context, Result};
use paralaunch::config::cli::{Cli, ExecutionMode};
use paralaunch::config::{toml, validator, TestPlan};
use paralaunch::coordinator::Sequencer;
use paralaunch::distributed::{AgentClient, AgentService, CallbackClient};
use paralaunch::output;
use paralaunch::rendezvous::BarrierOutcome;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code of barrier mode when the barrier was abandoned
const EXIT_ABANDONED: i32 = 2;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;
    init_tracing(&cli.log_level);

    match cli.mode {
        ExecutionMode::Launcher => run_launcher(cli),
        ExecutionMode::Agent => run_agent(cli),
        ExecutionMode::Barrier => run_barrier(cli),
    }
}

/// Logs go to stderr; stdout carries the report
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("paralaunch={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Run in launcher mode (execute a test plan)
fn run_launcher(cli: Cli) -> Result<()> {
    let plan_path = cli.plan.as_deref().context("Launcher mode requires a PLAN file")?;
    let mut plan = toml::parse_plan_file(plan_path)?;

    if let Some(host) = cli.callback_host {
        plan.launcher.callback_host = Some(host);
    }

    validator::validate_plan(&plan)
        .with_context(|| format!("Invalid test plan {}", plan_path.display()))?;

    println!("paralaunch v{}", env!("CARGO_PKG_VERSION"));
    print_plan(&plan);

    if cli.dry_run {
        println!("Dry run mode - test plan validated successfully");
        return Ok(());
    }

    let dispatcher = Arc::new(AgentClient::from_settings(&plan.launcher));
    let sequencer = Sequencer::new(
        Arc::new(plan.launcher.clone()),
        Arc::new(plan.parameters.clone()),
        dispatcher,
    );

    let report = sequencer.run(&plan.groups);
    output::print_report(&report);

    if let Some(path) = cli.json_output {
        output::write_json_output(&path, &report, true)
            .with_context(|| format!("Failed to write JSON report to {}", path.display()))?;
        info!("JSON report written to {}", path.display());
    }

    Ok(())
}

fn print_plan(plan: &TestPlan) {
    println!("Test plan: {} group(s)", plan.groups.len());
    for group in &plan.groups {
        println!("  {}: {} test(s), {} agent(s)", group.name, group.tests.len(), group.agents.len());
    }
    println!();
}

/// Run in agent mode (accept tests from launchers)
fn run_agent(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        let service = AgentService::new(cli.listen_port);
        service.run().await
    })
}

/// Run in barrier mode (enter a barrier for a running workload)
fn run_barrier(cli: Cli) -> Result<()> {
    let barrier = cli.barrier.context("Barrier mode requires --barrier")?;

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    let outcome = runtime.block_on(async {
        let (mut client, env) = CallbackClient::from_env().await?;
        info!(test = %env.test_name, group = %env.handle.group, %barrier, "Entering barrier");
        client.enter_barrier(&barrier).await
    })?;

    match outcome {
        BarrierOutcome::Released => {
            println!("Barrier {} released", barrier);
            Ok(())
        }
        BarrierOutcome::Abandoned => {
            warn!(%barrier, "Barrier abandoned");
            println!("Barrier {} abandoned", barrier);
            std::process::exit(EXIT_ABANDONED);
        }
    }
}
