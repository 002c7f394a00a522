use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use action_locator::KeywordResolver;
use webpilot_cli::{
    EngineConfig, NullClient, Orchestrator, RuleBasedInterpreter, RunRegistry,
};
use webpilot_core_types::{RunStatus, TestScript};
use webpilot_event_bus::{BroadcastSink, ProgressBus};

#[derive(Parser)]
#[command(name = "webpilot", version, about = "Step-by-step browser-automation execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a script file and print the run report as JSON.
    Run {
        /// Path to the step script, one instruction per line.
        #[arg(long)]
        script: PathBuf,

        /// Optional assertions file checked after all steps.
        #[arg(long)]
        assertions: Option<PathBuf>,

        /// Optional TOML config file; WEBPILOT_* env vars override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the hard step ceiling.
        #[arg(long)]
        max_steps: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            script,
            assertions,
            config,
            max_steps,
        } => run(script, assertions, config, max_steps).await,
    }
}

async fn run(
    script_path: PathBuf,
    assertions_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    max_steps: Option<u32>,
) -> anyhow::Result<ExitCode> {
    let mut config = EngineConfig::load(config_path.as_deref())?;
    if let Some(limit) = max_steps {
        config.max_steps = limit.max(1);
    }

    let steps_text = std::fs::read_to_string(&script_path)
        .with_context(|| format!("reading script {}", script_path.display()))?;
    let mut script = TestScript::new(steps_text);
    if let Some(path) = assertions_path {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading assertions {}", path.display()))?;
        script = script.with_assertions(text);
    }

    let sink = BroadcastSink::new(256);
    let bus = ProgressBus::new(sink, config.event_batch_size, config.event_batch_age());
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(RuleBasedInterpreter),
        Arc::new(NullClient::new()),
        RunRegistry::new(),
        bus,
        Arc::new(KeywordResolver::new()),
    );

    let run = orchestrator.execute(script).await;
    println!("{}", serde_json::to_string_pretty(&run)?);

    Ok(if run.status == RunStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
