use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::Agent;
use crate::diagnostics::FileDiagnostics;
use crate::error::BridgeError;
use crate::notify::NotificationChannel;
use crate::pending::PendingOperations;
use crate::protocol::ModelAlias;
use crate::tracker::ChangeTracker;

/// Everything guarded by the session lock.
pub struct SessionState {
    /// Active agent (None until the runner creates one)
    pub agent: Option<Arc<dyn Agent>>,

    /// True between turn open and turn close
    pub busy: bool,

    /// Tool output lines, append-only
    pub output: Vec<String>,

    /// Rendered chat lines, append-only
    pub chat: Vec<String>,

    /// Diagnostics waiting for a `fix-diagnostics` turn
    pub diagnostics: Vec<FileDiagnostics>,

    /// Files touched by the current turn
    pub changes: ChangeTracker,

    /// File-set requests parked while the agent was unavailable
    pub pending: PendingOperations,
}

/// Shared agent session. One per daemon.
pub struct Session {
    state: Mutex<SessionState>,
    notifications: NotificationChannel,
    /// Nesting depth of `run_turn`; only depth 1 opens and closes a turn
    pub(crate) turn_depth: AtomicUsize,
}

impl Session {
    pub fn new(scratch_root: &Path, notification_capacity: usize) -> Self {
        Self {
            state: Mutex::new(SessionState {
                agent: None,
                busy: false,
                output: Vec::new(),
                chat: Vec::new(),
                diagnostics: Vec::new(),
                changes: ChangeTracker::new(scratch_root),
                pending: PendingOperations::default(),
            }),
            notifications: NotificationChannel::new(notification_capacity),
            turn_depth: AtomicUsize::new(0),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    pub fn notifications(&self) -> &NotificationChannel {
        &self.notifications
    }

    pub async fn agent(&self) -> Option<Arc<dyn Agent>> {
        self.state.lock().await.agent.clone()
    }

    pub async fn is_busy(&self) -> bool {
        self.state.lock().await.busy
    }

    /// The agent, for operations that must not run during a turn.
    pub async fn idle_agent(&self) -> Result<Arc<dyn Agent>, BridgeError> {
        let state = self.state.lock().await;
        match &state.agent {
            None => Err(BridgeError::NotInitialized),
            Some(_) if state.busy => Err(BridgeError::Busy),
            Some(agent) => Ok(agent.clone()),
        }
    }

    pub async fn append_output(&self, lines: &[String]) {
        self.state.lock().await.output.extend(lines.iter().cloned());
    }

    pub async fn append_chat(&self, lines: Vec<String>) {
        self.state.lock().await.chat.extend(lines);
    }

    /// Slice of the output transcript. `end` defaults to the current length.
    pub async fn output_range(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<String>, BridgeError> {
        let state = self.state.lock().await;
        let len = state.output.len() as i64;
        let start = start.unwrap_or(0);
        let end = end.unwrap_or(len);

        if start < 0 || start > len {
            return Err(BridgeError::InvalidParams(format!(
                "start_index {start} outside 0..={len}"
            )));
        }
        if end < start || end > len {
            return Err(BridgeError::InvalidParams(format!(
                "end_index {end} outside {start}..={len}"
            )));
        }
        Ok(state.output[start as usize..end as usize].to_vec())
    }

    pub async fn chat_transcript(&self) -> Vec<String> {
        self.state.lock().await.chat.clone()
    }

    /// Replace the pending diagnostics. An empty batch keeps the previous set.
    pub async fn set_diagnostics(&self, diagnostics: Vec<FileDiagnostics>) {
        if diagnostics.is_empty() {
            return;
        }
        debug!("[session] {} file(s) with diagnostics queued", diagnostics.len());
        self.state.lock().await.diagnostics = diagnostics;
    }
}

/// Daemon-wide shared state
pub struct DaemonState {
    pub session: Arc<Session>,

    /// Commands for the turn runner
    commands: mpsc::Sender<String>,

    /// Cancelled by the `exit` method
    pub shutdown: CancellationToken,

    /// Model aliases, sorted by alias name
    pub model_aliases: Vec<ModelAlias>,

    /// Delay between publishing the exit notification and terminating
    pub exit_grace: Duration,
}

impl DaemonState {
    pub fn new(
        session: Arc<Session>,
        commands: mpsc::Sender<String>,
        shutdown: CancellationToken,
        mut model_aliases: Vec<ModelAlias>,
        exit_grace: Duration,
    ) -> Self {
        model_aliases.sort_by(|a, b| a.alias_name.cmp(&b.alias_name));
        Self {
            session,
            commands,
            shutdown,
            model_aliases,
            exit_grace,
        }
    }

    /// Hand a command to the turn runner without waiting for the turn.
    pub async fn submit_command(&self, command: String) -> Result<(), BridgeError> {
        self.session.idle_agent().await?;
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BridgeError::Busy,
            mpsc::error::TrySendError::Closed(_) => {
                BridgeError::Internal("turn runner has stopped".to_string())
            }
        })
    }
}
