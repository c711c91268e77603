//! Turn bracketing.
//!
//! Every agent turn runs between `open_turn` and `close_turn`: open marks the
//! session busy, announces the command and resets change tracking; close
//! computes the change report, clears busy, announces completion and replays
//! file operations queued during the turn. A turn started from inside another
//! turn (the agent re-entering itself) is forwarded without a second bracket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::agent::{Agent, ConfirmPrompt, TurnHooks, TurnOutcome};
use crate::diagnostics::build_prompt;
use crate::error::BridgeError;
use crate::notify::Notification;
use crate::state::Session;

/// Command text that runs the pending diagnostics instead of a normal turn.
pub const FIX_DIAGNOSTICS_COMMAND: &str = "fix-diagnostics";

const COMMIT_COMMAND: &str = "/commit";
const COMMIT_MARKER: &str = "Commit ";
const CONVERSATIONAL_COMMANDS: [&str; 4] = ["/ask", "/architect", "/code", "/lint"];

/// First whitespace-delimited token of a command line.
pub fn command_name(message: &str) -> &str {
    message.split_whitespace().next().unwrap_or("")
}

/// Completion message for a finished turn. `output_since` is the transcript
/// produced after the turn opened.
pub fn result_message(command_text: &str, output_since: &[String]) -> String {
    let command = command_name(command_text);
    if command.is_empty() {
        return String::new();
    }
    if command == COMMIT_COMMAND {
        return output_since
            .iter()
            .find(|line| line.starts_with(COMMIT_MARKER))
            .cloned()
            .unwrap_or_default();
    }
    if CONVERSATIONAL_COMMANDS.contains(&command) {
        return format!("{command} complete");
    }
    "complete".to_string()
}

/// Split chat text into transcript lines, applying quote and hard-break
/// formatting.
pub fn render_chat_lines(text: &str, linebreak: bool, blockquote: bool, strip: bool) -> Vec<String> {
    let mut text = text.to_string();
    if blockquote {
        if strip {
            text = text.trim().to_string();
        }
        text = format!("> {text}");
    }
    if linebreak {
        if strip {
            text = text.trim_end().to_string();
        }
        text.push_str("  ");
    }
    text.split('\n').map(str::to_string).collect()
}

/// Nesting guard for `run_turn`.
struct TurnDepth<'a> {
    counter: &'a AtomicUsize,
    depth: usize,
}

impl<'a> TurnDepth<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let depth = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Self { counter, depth }
    }

    fn is_nested(&self) -> bool {
        self.depth > 1
    }
}

impl Drop for TurnDepth<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hooks that feed agent activity into the session.
pub struct SessionHooks<'a> {
    session: &'a Session,
    auto_approve: bool,
}

impl<'a> SessionHooks<'a> {
    pub fn new(session: &'a Session, auto_approve: bool) -> Self {
        Self {
            session,
            auto_approve,
        }
    }

    /// Confirmation traffic is only worth reporting while a turn runs and
    /// someone has to answer.
    async fn reports_confirmations(&self) -> bool {
        !self.auto_approve && self.session.is_busy().await
    }
}

#[async_trait]
impl<'a> TurnHooks for SessionHooks<'a> {
    async fn before_write(&self, path: &str) {
        self.session.lock().await.changes.record_write(path);
    }

    async fn after_write(&self, path: &str) {
        self.session.lock().await.changes.record_created(path);
    }

    async fn tool_output(&self, lines: &[String]) {
        self.session.append_output(lines).await;
    }

    async fn append_chat_history(&self, text: &str, linebreak: bool, blockquote: bool, strip: bool) {
        self.session
            .append_chat(render_chat_lines(text, linebreak, blockquote, strip))
            .await;
    }

    async fn confirm_asked(&self, prompt: ConfirmPrompt) {
        if !self.reports_confirmations().await {
            return;
        }
        self.session
            .notifications()
            .publish(Notification::ConfirmAsked {
                question: prompt.question,
                options: prompt.options,
                default: prompt.default,
                group: prompt.group,
            })
            .await;
    }

    async fn confirm_answered(&self, accepted: bool) {
        if !self.reports_confirmations().await {
            return;
        }
        self.session
            .notifications()
            .publish(Notification::ConfirmAnswered { accepted })
            .await;
    }
}

impl Session {
    /// Make `agent` the active agent. A fresh agent is announced and receives
    /// the queued file operations; a mode-switch replacement is installed
    /// silently.
    pub async fn install_agent(&self, agent: Arc<dyn Agent>, switched: bool) {
        self.lock().await.agent = Some(agent);
        if switched {
            info!("[turn] agent replaced after mode switch");
            return;
        }
        info!("[turn] agent started");
        self.notifications().publish(Notification::AgentStarted).await;
        self.reconcile().await;
    }

    /// Open a turn. Returns the transcript watermark for `close_turn`.
    pub async fn open_turn(&self, command: &str) -> usize {
        let watermark = {
            let mut state = self.lock().await;
            state.busy = true;
            state.changes.begin_turn();
            state.output.len()
        };
        info!("[turn] open: {command:?} (watermark {watermark})");

        let name = command_name(command);
        if !name.is_empty() {
            self.notifications()
                .publish(Notification::TurnStarted {
                    command: name.to_string(),
                })
                .await;
        }
        watermark
    }

    /// Close the turn opened with `command` at `watermark`.
    pub async fn close_turn(&self, agent: &Arc<dyn Agent>, command: &str, watermark: usize) {
        let (modified_info, message) = {
            let mut state = self.lock().await;
            let modified = state.changes.finish(|path| agent.abs_path(path));
            state.busy = false;
            let since = state.output.get(watermark..).unwrap_or_default();
            (modified, result_message(command, since))
        };
        info!(
            "[turn] close: {command:?} modified={} message={message:?}",
            modified_info.len()
        );

        self.notifications()
            .publish(Notification::TurnCompleted {
                modified_info,
                message,
            })
            .await;
        self.reconcile().await;
    }

    /// Run one bracketed turn. A mode switch comes back as
    /// `TurnOutcome::SwitchMode` after the turn has been closed.
    pub async fn run_turn(
        &self,
        agent: &Arc<dyn Agent>,
        command: &str,
    ) -> Result<TurnOutcome, BridgeError> {
        let depth = TurnDepth::enter(&self.turn_depth);
        let hooks = SessionHooks::new(self, agent.auto_approve());

        if depth.is_nested() {
            debug!("[turn] nested run at depth {}, forwarding", depth.depth);
            return Ok(agent.run_turn(command, &hooks).await?);
        }

        let watermark = self.open_turn(command).await;
        let result = if command.trim() == FIX_DIAGNOSTICS_COMMAND {
            self.fix_diagnostics(agent, &hooks)
                .await
                .map(|()| TurnOutcome::Completed)
        } else {
            agent
                .run_turn(command, &hooks)
                .await
                .map_err(BridgeError::from)
        };
        self.close_turn(agent, command, watermark).await;

        match &result {
            Ok(TurnOutcome::SwitchMode(switch)) => {
                info!("[turn] mode switch requested: {switch:?}")
            }
            Ok(TurnOutcome::Completed) => {}
            Err(e) => warn!("[turn] {command:?} failed: {e}"),
        }
        result
    }

    /// Feed each file's diagnostics to a throwaway copy of the agent that
    /// sees only that file.
    async fn fix_diagnostics(
        &self,
        agent: &Arc<dyn Agent>,
        hooks: &dyn TurnHooks,
    ) -> Result<(), BridgeError> {
        let diagnostics = std::mem::take(&mut self.lock().await.diagnostics);
        if diagnostics.is_empty() {
            info!("[turn] no diagnostics to fix");
            return Ok(());
        }

        for file in &diagnostics {
            let rel_fname = agent.rel_path(&file.fname);
            let content = match tokio::fs::read(agent.abs_path(&file.fname)).await {
                Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => {
                    warn!("[turn] unable to read {}: {e}", file.fname);
                    None
                }
            };
            let prompt = build_prompt(file, &rel_fname, content.as_deref());
            hooks.tool_output(std::slice::from_ref(&prompt)).await;

            let fixer = match agent.clone_detached().await {
                Ok(fixer) => fixer,
                Err(e) => {
                    warn!("[turn] no fixer for {}: {e}", file.fname);
                    continue;
                }
            };
            if let Err(e) = fixer.add_files(std::slice::from_ref(&file.fname)).await {
                warn!("[turn] unable to add {} to fixer: {e}", file.fname);
                continue;
            }
            if let Err(e) = fixer.run_turn(&prompt, hooks).await {
                warn!("[turn] fixing {} failed: {e}", file.fname);
            }
        }
        Ok(())
    }
}
