//! Turn runner.
//!
//! Creates the agent, then executes submitted commands one at a time. Commands
//! arrive from `run_command` and from lines typed on the daemon's stdin.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentFactory, TurnOutcome};
use crate::error::BridgeError;
use crate::state::Session;

/// Commands waiting for the runner. Submitting while one is already waiting
/// is rejected as busy.
pub const COMMAND_QUEUE_CAPACITY: usize = 1;

pub fn command_channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(COMMAND_QUEUE_CAPACITY)
}

pub struct TurnRunner {
    session: Arc<Session>,
    factory: Arc<dyn AgentFactory>,
    commands: mpsc::Receiver<String>,
    shutdown: CancellationToken,
}

impl TurnRunner {
    pub fn new(
        session: Arc<Session>,
        factory: Arc<dyn AgentFactory>,
        commands: mpsc::Receiver<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            factory,
            commands,
            shutdown,
        }
    }

    /// Create the agent and run commands until shutdown or until every
    /// command sender is gone.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        let agent = self.factory.create().await?;
        self.session.install_agent(agent, false).await;

        loop {
            let command = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.execute(&command).await;
        }

        info!("[runner] stopped");
        Ok(())
    }

    async fn execute(&self, command: &str) {
        let Some(agent) = self.session.agent().await else {
            warn!("[runner] no agent for {command:?}");
            return;
        };

        match self.session.run_turn(&agent, command).await {
            Ok(TurnOutcome::Completed) => {}
            Ok(TurnOutcome::SwitchMode(switch)) => {
                match self.factory.switch(&agent, switch).await {
                    Ok(replacement) => self.session.install_agent(replacement, true).await,
                    Err(e) => warn!("[runner] mode switch failed: {e}"),
                }
            }
            Err(e) => warn!("[runner] {command:?} failed: {e}"),
        }
    }
}

/// Forward non-blank lines from `input` to the runner.
pub async fn forward_lines<R>(input: R, commands: mpsc::Sender<String>, shutdown: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                debug!("[runner] input: {line:?}");
                if commands.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("[runner] input closed");
                break;
            }
            Err(e) => {
                warn!("[runner] input error: {e}");
                break;
            }
        }
    }
}
