use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swen::{config::Config, FlowExecutor, RunState};

#[derive(Parser)]
#[command(author, version, about = "Run a declarative flow of external steps", long_about = None)]
struct Cli {
    /// Flow document (YAML)
    #[arg(short, long)]
    flow: PathBuf,

    /// Directory steps are launched from (overrides SWEN_WORKDIR)
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print a JSON audit of the run to stderr
    #[arg(long)]
    report: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    config.override_working_dir(cli.workdir);
    config.validate()?;

    // Initialize logging on stderr so step output owns stdout
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Loading flow from {}", cli.flow.display());
    let mut executor = FlowExecutor::from_path(&cli.flow)
        .with_context(|| format!("failed to load flow {}", cli.flow.display()))?
        .with_config(config.execution.clone());

    let outcome = executor.execute().context("flow execution failed")?;

    if let Some(stdout) = &outcome.stdout {
        std::io::stdout().write_all(stdout)?;
    }
    if let Some(stderr) = &outcome.stderr {
        std::io::stderr().write_all(stderr)?;
    }

    if cli.report {
        eprintln!("{}", serde_json::to_string_pretty(&executor.report()?)?);
    }

    if executor.state() == RunState::Halted {
        info!("Run halted after step {:?}", executor.execution_graph().last().map(|v| &v.step_id));
    }

    // No step ran: nothing failed
    let code = outcome.exit_code.unwrap_or(0);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
