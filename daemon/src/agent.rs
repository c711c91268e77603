//! The coding-agent collaborator seam.
//!
//! The bridge never edits files itself. It drives an [`Agent`] and observes it
//! through the [`TurnHooks`] handed to every turn: the agent must report each
//! file it is about to write, every line of tool output, chat transcript
//! text, and confirmation prompts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AgentError;

/// A confirmation prompt raised by the agent during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub question: String,
    pub options: Vec<String>,
    pub default: Option<String>,
    pub group: Option<String>,
}

/// Agent-requested replacement of the active agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeSwitch {
    pub edit_format: Option<String>,
    pub model: Option<String>,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    SwitchMode(ModeSwitch),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    pub main_model: String,
    pub edit_format: String,
    pub cwd: String,
}

/// Observer interface the agent calls while a turn runs.
#[async_trait]
pub trait TurnHooks: Send + Sync {
    /// Called before every write, with the path as the agent will write it.
    async fn before_write(&self, path: &str);

    /// Called after a write that was not announced beforehand, such as a
    /// file the agent created.
    async fn after_write(&self, _path: &str) {}

    async fn tool_output(&self, lines: &[String]);

    async fn append_chat_history(&self, text: &str, linebreak: bool, blockquote: bool, strip: bool);

    async fn confirm_asked(&self, prompt: ConfirmPrompt);

    async fn confirm_answered(&self, accepted: bool);
}

/// Handle to a live coding agent.
///
/// Methods take `&self`; implementations keep their file sets behind their
/// own locks so reads stay available while a turn runs.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run one command turn to completion.
    async fn run_turn(&self, message: &str, hooks: &dyn TurnHooks)
        -> Result<TurnOutcome, AgentError>;

    async fn add_files(&self, paths: &[String]) -> Result<(), AgentError>;

    async fn mark_read_only(&self, paths: &[String]) -> Result<(), AgentError>;

    async fn drop_files(&self, paths: &[String]) -> Result<(), AgentError>;

    async fn clear_history(&self) -> Result<(), AgentError>;

    /// Drop every file and clear the chat history.
    async fn reset(&self) -> Result<(), AgentError>;

    async fn load_session(&self, path: &Path) -> Result<(), AgentError>;

    async fn save_session(&self, path: &Path) -> Result<(), AgentError>;

    /// A copy of this agent with no chat history and no files.
    async fn clone_detached(&self) -> Result<Arc<dyn Agent>, AgentError>;

    /// Editable files, relative to the root.
    async fn in_chat_files(&self) -> Vec<String>;

    /// Read-only files, relative to the root.
    async fn read_only_files(&self) -> Vec<String>;

    async fn announcements(&self) -> Vec<String>;

    async fn info(&self) -> AgentInfo;

    /// Raw input history, oldest first.
    async fn input_history(&self) -> Vec<String>;

    /// Chat messages since the last clear, oldest first.
    async fn chat_messages(&self) -> Vec<String>;

    /// Whether confirmation prompts are answered automatically.
    fn auto_approve(&self) -> bool;

    fn root(&self) -> &Path;

    fn abs_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        }
    }

    fn rel_path(&self, path: &str) -> String {
        Path::new(path)
            .strip_prefix(self.root())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string())
    }
}

/// Builds agents for the turn runner.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Agent>, AgentError>;

    /// Build the replacement for `current` after a mode switch.
    async fn switch(
        &self,
        current: &Arc<dyn Agent>,
        switch: ModeSwitch,
    ) -> Result<Arc<dyn Agent>, AgentError>;
}
