use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use coder_bridge::command_agent::{CommandAgentConfig, CommandAgentFactory};
use coder_bridge::config::{Args, BridgeConfig};
use coder_bridge::runner::{self, TurnRunner};
use coder_bridge::state::{DaemonState, Session};

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the port announcement, so logs never go there.
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    let data_dir = args.data_dir();
    info!("Data directory: {}", data_dir.display());
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        info!("Created data directory: {}", data_dir.display());
    }
    let config = BridgeConfig::load(&data_dir).map_err(anyhow::Error::msg)?;

    let scratch_dir = args.scratch_dir();
    std::fs::create_dir_all(&scratch_dir)
        .with_context(|| format!("create scratch dir {}", scratch_dir.display()))?;
    let root = std::env::current_dir()?;
    info!("Agent root: {}", root.display());

    // Create shared state
    let session = Arc::new(Session::new(&scratch_dir, args.notification_capacity));
    let (commands_tx, commands_rx) = runner::command_channel();
    let shutdown = CancellationToken::new();
    let state = Arc::new(DaemonState::new(
        session.clone(),
        commands_tx.clone(),
        shutdown.clone(),
        config.model_aliases(),
        args.exit_grace(),
    ));

    // Bind TCP listener
    let listener = TcpListener::bind(&args.listen).await?;
    let port = listener.local_addr()?.port();
    info!("Listening on {}", listener.local_addr()?);
    println!("coder-bridge port: {port}");

    let mut agent_args = config.agent.args.clone();
    agent_args.extend(args.agent_args.iter().cloned());
    info!("Agent program: {} {:?}", config.agent.program, agent_args);
    let factory = Arc::new(CommandAgentFactory::new(
        CommandAgentConfig {
            program: config.agent.program.clone(),
            args: agent_args,
            root,
            model: args.model.clone(),
            edit_format: args.edit_format.clone(),
            auto_approve: args.yes,
        },
        config.alias_table(),
    ));

    let runner = TurnRunner::new(session, factory, commands_rx, shutdown.clone());
    tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            error!("[runner] {e}");
        }
    });
    tokio::spawn(runner::forward_lines(
        tokio::io::stdin(),
        commands_tx,
        shutdown.clone(),
    ));

    // Accept loop
    coder_bridge::serve(listener, state.clone()).await;

    tokio::time::sleep(state.exit_grace).await;
    info!("Exiting");
    std::process::exit(0);
}
