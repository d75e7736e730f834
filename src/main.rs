use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;

use agten::config::AgentConfig;
use agten::tools::builtin_tools;
use agten::{AgentRegistry, LifecycleManager, MessageType, RuntimeConfig};

#[derive(Parser)]
#[command(name = "agten")]
#[command(about = "Runtime for message-passing agents with sandboxed tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task on a fresh agent and print what it produces
    Run {
        #[arg(help = "Task input")]
        task: String,
        #[arg(long, short, help = "Config file (toml, yaml or json)")]
        config: Option<PathBuf>,
        #[arg(long, default_value = "scripted", help = "Agent name from the config, or an agent type")]
        agent: String,
        #[arg(long, default_value = ".", help = "Root directory for file tools")]
        sandbox: PathBuf,
    },
    /// Validate a config file
    CheckConfig {
        path: PathBuf,
    },
    /// List the built-in tools with their schemas
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            task,
            config,
            agent,
            sandbox,
        } => run_task(&task, config, &agent, sandbox).await?,
        Commands::CheckConfig { path } => check_config(path)?,
        Commands::Tools => list_tools(),
    }

    Ok(())
}

async fn run_task(task: &str, config: Option<PathBuf>, agent: &str, sandbox: PathBuf) -> Result<()> {
    let config = match config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::from_env(),
    };
    config.ensure_valid()?;

    let registry = AgentRegistry::with_defaults(sandbox);
    let agent_config = config
        .agent(agent)
        .cloned()
        .unwrap_or_else(|| AgentConfig::new(agent, agent));

    let manager = LifecycleManager::new(config);
    let id = manager
        .create_agent_from_config(&registry, &agent_config, None)
        .await?;
    manager.start_agent(id)?;
    println!("Agent '{}' ({}) running task", agent_config.name, id);

    let mut stream = manager.run_agent_task(id, task)?;
    let mut failed = false;
    while let Some(message) = stream.next().await {
        failed |= message.message_type == MessageType::Error;
        println!("[{}] {}", message.message_type.as_str(), message.content);
    }

    let usage = manager.executor().get_resource_usage();
    println!(
        "\nTool calls: {} ({} failed, {} timed out), {:?} in tools",
        usage.total_calls, usage.failures, usage.timeouts, usage.cumulative_time
    );

    let report = manager.shutdown().await;
    for (agent_id, error) in &report.failures {
        eprintln!("Teardown of {} failed: {}", agent_id, error);
    }

    if failed {
        bail!("task failed");
    }
    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = RuntimeConfig::from_file(&path)?;
    let errors = config.validate();
    if errors.is_empty() {
        println!(
            "{}: OK ({} agents, {} tools)",
            path.display(),
            config.agents.len(),
            config.tools.len()
        );
        return Ok(());
    }

    for error in &errors {
        println!("{}", error);
    }
    bail!("{} problems in {}", errors.len(), path.display())
}

fn list_tools() {
    for tool in builtin_tools(PathBuf::from(".")) {
        println!("{} - {}", tool.name(), tool.description());
        println!("  {}", tool.parameters_schema());
    }
}
