use anyhow::{Context, Result};
use clap::Parser;
use fdcolor::cli::{self, Cli, LaunchPlan};
use std::os::unix::process::CommandExt;
use std::process::Command;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let exe = std::env::current_exe().context("Failed to locate the fdcolor executable")?;
    let library = cli::locate_library(args.library.as_deref(), &exe)?;
    let plan = LaunchPlan::new(&args, library, std::env::var_os("LD_PRELOAD"))?;
    tracing::debug!(?plan, "launching");

    let program = &args.command[0];
    let err = Command::new(program)
        .args(&args.command[1..])
        .envs(plan.vars.iter().map(|(name, value)| (name, value)))
        .exec();

    // exec only returns on failure
    Err(err).with_context(|| format!("Failed to exec {}", program))
}
