use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nodeflow_core::config::AppConfig;
use nodeflow_core::node::NodeRecord;
use nodeflow_core::traits::TextGenerator;
use nodeflow_engine::graph::{find_cycle, DependencyGraph};
use nodeflow_engine::{NoopSink, RunOrchestrator};

#[derive(Parser)]
#[command(name = "nodeflow", version, about = "Run text-processing node graphs in dependency order")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "nodeflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a node list and print the results
    Run {
        /// JSON file with the node list
        nodes: PathBuf,
        /// Print every event as a JSON line while the run progresses
        #[arg(long)]
        stream: bool,
    },
    /// Print the execution order of a node list without running it
    Plan {
        /// JSON file with the node list
        nodes: PathBuf,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Node list file: a bare array or `{"nodes": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum NodeList {
    Bare(Vec<NodeRecord>),
    Wrapped { nodes: Vec<NodeRecord> },
}

fn read_nodes(path: &Path) -> anyhow::Result<Vec<NodeRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read node list {}", path.display()))?;
    let list: NodeList = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid node list in {}", path.display()))?;
    Ok(match list {
        NodeList::Bare(nodes) | NodeList::Wrapped { nodes } => nodes,
    })
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(AppConfig::default())
    }
}

fn build_orchestrator(config: &AppConfig) -> anyhow::Result<RunOrchestrator> {
    let generator: Arc<dyn TextGenerator> = Arc::new(
        nodeflow_llm::build_generator(config).context("Failed to set up the model client")?,
    );
    let search = nodeflow_llm::build_search(config).context("Failed to set up web search")?;
    Ok(RunOrchestrator::from_config(generator, search, config))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Cancelling run...");
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("nodeflow=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "nodeflow", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        Commands::Plan { nodes } => {
            let nodes = read_nodes(&nodes)?;
            let schedule = RunOrchestrator::plan(&nodes)?;
            if schedule.has_cycles() {
                let graph = DependencyGraph::build(&nodes);
                if let Some(path) = find_cycle(&graph) {
                    warn!(cycle = %path.join(" -> "), "Node list contains a cycle");
                }
            }
            println!("{}", serde_json::to_string_pretty(&schedule)?);
        }
        Commands::Run { nodes, stream } => {
            let nodes = read_nodes(&nodes)?;
            let orchestrator = build_orchestrator(&config)?;

            if stream {
                let mut events = orchestrator.run_stream(nodes);
                let interrupted = tokio::signal::ctrl_c();
                tokio::pin!(interrupted);
                loop {
                    tokio::select! {
                        event = events.next() => match event {
                            Some(event) => println!("{}", serde_json::to_string(&event)?),
                            None => break,
                        },
                        _ = &mut interrupted => {
                            info!("Cancelling run...");
                            events.cancel();
                            break;
                        }
                    }
                }
            } else {
                let cancel = CancellationToken::new();
                cancel_on_ctrl_c(cancel.clone());
                let summary = orchestrator.run(&nodes, &NoopSink, &cancel).await?;
                if !summary.failures.is_empty() {
                    warn!(failed = summary.failures.len(), "Some nodes failed");
                }
                println!("{}", serde_json::to_string_pretty(&summary.results())?);
            }
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}
