use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

use stagehand::config::WorkflowLoader;
use stagehand::engine::{CancelFlag, ConsoleProgress, WorkflowRunner};
use stagehand::library::DocumentLibrary;
use stagehand::llm::ClaudeCliClient;
use stagehand::subprocess::SubprocessManager;

/// Declarative AI workflow orchestration for git repositories
#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Run declarative AI workflows against a repository", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available workflow definitions
    List {
        /// Directory containing workflow definitions
        /// (default: .stagehand/workflows)
        #[arg(long)]
        workflows_dir: Option<PathBuf>,
    },
    /// Run a workflow by name
    Run {
        /// Workflow name (explicit `name` field or file stem)
        name: String,

        /// Repository to operate on (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Directory containing workflow definitions
        /// (default: .stagehand/workflows)
        #[arg(long)]
        workflows_dir: Option<PathBuf>,

        /// Print the run result as JSON instead of a summary line
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("Stagehand started with verbosity level: {}", cli.verbose);

    let result = match cli.command {
        Commands::List { workflows_dir } => run_list(workflows_dir).await,
        Commands::Run {
            name,
            path,
            workflows_dir,
            json,
        } => run_workflow(name, path, workflows_dir, json).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn resolve_workflows_dir(workdir: &std::path::Path, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| workdir.join(".stagehand").join("workflows"))
}

async fn run_list(workflows_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let workdir = std::env::current_dir()?;
    let loader = WorkflowLoader::new(resolve_workflows_dir(&workdir, workflows_dir));

    let summaries = loader.list_all().await?;
    if summaries.is_empty() {
        println!("No workflows found.");
        return Ok(());
    }

    println!("Available workflows:");
    for summary in summaries {
        let description = if summary.description.is_empty() {
            String::new()
        } else {
            format!(" - {}", summary.description)
        };
        println!(
            "  {} ({} steps){}",
            summary.name, summary.step_count, description
        );
    }
    Ok(())
}

async fn run_workflow(
    name: String,
    path: Option<PathBuf>,
    workflows_dir: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let workdir = match path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    let loader = WorkflowLoader::new(resolve_workflows_dir(&workdir, workflows_dir));
    let definition = loader.load_by_name(&name).await?;

    let subprocess = SubprocessManager::production();
    let library = DocumentLibrary::for_project(&workdir);
    let chat = ClaudeCliClient::new(subprocess.clone());
    if !chat.check_availability().await.unwrap_or(false) {
        tracing::warn!("claude CLI not found; agent and prompt steps will fail");
    }
    let chat = Arc::new(chat);
    let cancel = CancelFlag::new();

    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, finishing current step...");
            signal_flag.cancel();
        }
    });

    let runner = WorkflowRunner::new(
        subprocess,
        library,
        chat,
        workdir,
        Arc::new(ConsoleProgress),
        cancel,
    );

    let result = runner.run(&definition).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if !result.passed {
        std::process::exit(1);
    }
    Ok(())
}
