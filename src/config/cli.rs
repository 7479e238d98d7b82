//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Launcher mode (default) - run a test plan group by group
    Launcher,
    /// Agent mode - accept dispatched tests and run them on this host
    Agent,
    /// Barrier mode - enter a barrier on behalf of a running workload
    Barrier,
}

/// paralaunch - distributed launcher for parallel test groups
#[derive(Parser, Debug)]
#[command(name = "paralaunch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: launcher, agent, or barrier
    #[arg(long, value_enum, default_value = "launcher")]
    pub mode: ExecutionMode,

    /// Test plan file (launcher mode only)
    #[arg(value_name = "PLAN")]
    pub plan: Option<PathBuf>,

    /// Port for the agent to listen on (agent mode only)
    #[arg(long, default_value = "8090")]
    pub listen_port: u16,

    /// Barrier to enter (barrier mode only)
    #[arg(long)]
    pub barrier: Option<String>,

    /// Address agents use to reach this launcher (overrides the plan file)
    #[arg(long)]
    pub callback_host: Option<String>,

    /// Write a JSON report to this path
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    /// Validate the plan and exit without dispatching
    #[arg(long)]
    pub dry_run: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "PARALAUNCH_LOG", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse arguments from the process command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check mode-specific argument requirements
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.mode {
            ExecutionMode::Launcher if self.plan.is_none() => {
                anyhow::bail!("Launcher mode requires a PLAN file");
            }
            ExecutionMode::Barrier if self.barrier.is_none() => {
                anyhow::bail!("Barrier mode requires --barrier");
            }
            _ => Ok(()),
        }
    }
}
