mod config;
mod run_cmd;
mod runs_cmd;
mod runtime;
mod status_cmd;
mod subagent_cmds;
mod tui;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use muster_core::NullSink;
use tokio_util::sync::CancellationToken;

use config::ConfigFile;

#[derive(Parser)]
#[command(name = "muster", about = "Delegated agent execution runtime")]
struct Cli {
    /// Path to a muster config file (overrides MUSTER_CONFIG env var)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file (no database required)
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Subagent definitions
    Subagent {
        #[command(subcommand)]
        command: SubagentCommands,
    },
    /// Run a single subagent against a task
    Run {
        /// Subagent ID
        agent_id: String,
        /// Task text
        task: String,
        /// Attach a live terminal dashboard while the run is in flight
        #[arg(long)]
        watch: bool,
    },
    /// Run several subagents against the same task concurrently
    RunParallel {
        /// Task text
        task: String,
        /// Subagent IDs to run (omit to run every enabled subagent)
        #[arg(long = "agent")]
        agent_ids: Vec<String>,
        #[arg(long)]
        watch: bool,
    },
    /// Run a TOML task plan as a dependency-ordered DAG
    RunDag {
        /// Path to the plan TOML file
        plan: String,
        #[arg(long)]
        watch: bool,
    },
    /// Admission and subagent summary
    Status,
    /// Run history
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
}

#[derive(Subcommand)]
enum SubagentCommands {
    /// List defined subagents
    List,
    /// Define a new subagent
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        system_prompt: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long = "skill", value_name = "TAG")]
        skill_tags: Vec<String>,
    },
    /// Update an existing subagent
    Configure {
        id: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        system_prompt: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
    },
}

#[derive(Subcommand)]
enum RunsCommands {
    /// List recent runs
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the full payload for one run
    Show { run_id: String },
}

/// Execute `muster init`: write a starter config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!("config file already exists at {}\nUse --force to overwrite.", path.display());
    }

    let cfg = ConfigFile::default();
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  harness.provider = {}", cfg.harness.provider);
    println!("  harness.program  = {}", cfg.harness.program);
    println!();
    println!("Next: run `muster subagent create <name>` to define a subagent.");

    Ok(())
}

/// Wire a Ctrl-C handler that cancels `token` on the first interrupt.
fn spawn_ctrl_c_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        cmd_init(force)?;
        return Ok(());
    }

    let resolved = config::resolve(cli.config.as_deref())?;
    let state_dir = muster_store::paths::state_dir();
    std::fs::create_dir_all(&state_dir)?;
    let stack = runtime::build(resolved, &state_dir);

    let background_cancel = CancellationToken::new();
    runtime::spawn_recovery_loop(&stack, stack.admission.config().recovery_interval_ms, background_cancel.clone());

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Subagent { command } => match command {
            SubagentCommands::List => subagent_cmds::run_list(&stack.storage)?,
            SubagentCommands::Create { name, description, system_prompt, provider, model, skill_tags } => {
                subagent_cmds::run_create(&stack.storage, name, description, system_prompt, provider, model, skill_tags)?
            }
            SubagentCommands::Configure { id, description, system_prompt, provider, model, enabled } => {
                subagent_cmds::run_configure(&stack.storage, &id, description, system_prompt, provider, model, enabled)?
            }
        },
        Commands::Run { agent_id, task, watch } => {
            let cancel = CancellationToken::new();
            spawn_ctrl_c_handler(cancel.clone());

            let outcome = if watch {
                let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
                let sink = Arc::new(tui::ChannelSink::new(tx));
                let dashboard = tokio::spawn(tui::run_dashboard(rx));
                let outcome = run_cmd::run_single(&stack.orchestrator, &agent_id, &task, sink, &cancel).await?;
                dashboard.await??;
                outcome
            } else {
                run_cmd::run_single(&stack.orchestrator, &agent_id, &task, Arc::new(NullSink), &cancel).await?
            };

            run_cmd::print_outcome(&outcome);
            background_cancel.cancel();
            std::process::exit(outcome.outcome_code.exit_code());
        }
        Commands::RunParallel { task, agent_ids, watch } => {
            let cancel = CancellationToken::new();
            spawn_ctrl_c_handler(cancel.clone());
            let ids = if agent_ids.is_empty() { None } else { Some(agent_ids) };

            let outcome = if watch {
                let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
                let sink = Arc::new(tui::ChannelSink::new(tx));
                let dashboard = tokio::spawn(tui::run_dashboard(rx));
                let outcome = run_cmd::run_parallel(&stack.orchestrator, ids, &task, sink, &cancel).await?;
                dashboard.await??;
                outcome
            } else {
                run_cmd::run_parallel(&stack.orchestrator, ids, &task, Arc::new(NullSink), &cancel).await?
            };

            run_cmd::print_outcome(&outcome);
            background_cancel.cancel();
            std::process::exit(outcome.outcome_code.exit_code());
        }
        Commands::RunDag { plan, watch } => {
            let cancel = CancellationToken::new();
            spawn_ctrl_c_handler(cancel.clone());

            let outcome = if watch {
                let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
                let sink = Arc::new(tui::ChannelSink::new(tx));
                let dashboard = tokio::spawn(tui::run_dashboard(rx));
                let outcome = run_cmd::run_dag(&stack.orchestrator, &stack.storage, &plan, sink, &cancel).await?;
                dashboard.await??;
                outcome
            } else {
                run_cmd::run_dag(&stack.orchestrator, &stack.storage, &plan, Arc::new(NullSink), &cancel).await?
            };

            background_cancel.cancel();
            std::process::exit(run_cmd::exit_code_for_dag(outcome));
        }
        Commands::Status => status_cmd::run_status(&stack.admission, &stack.storage).await?,
        Commands::Runs { command } => match command {
            RunsCommands::List { limit } => runs_cmd::run_list(&stack.storage, limit)?,
            RunsCommands::Show { run_id } => runs_cmd::run_show(&stack.runs, &run_id)?,
        },
    }

    background_cancel.cancel();
    Ok(())
}
