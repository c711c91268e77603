use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::notify::DEFAULT_CAPACITY;
use crate::protocol::ModelAlias;

/// Coder bridge daemon - drives a coding agent for an editor front-end
#[derive(Parser, Debug, Clone)]
#[command(name = "coder-bridge")]
pub struct Args {
    /// Bind address (port 0 picks a free port)
    #[arg(long, env = "CODER_BRIDGE_LISTEN", default_value = "127.0.0.1:0")]
    pub listen: String,

    /// Data directory holding bridge.json
    #[arg(long, env = "CODER_BRIDGE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory for per-turn file snapshots
    #[arg(long, env = "CODER_BRIDGE_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Write logs here instead of stderr
    #[arg(long, env = "CODER_BRIDGE_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Model name or alias
    #[arg(long, env = "CODER_BRIDGE_MODEL", default_value = "sonnet")]
    pub model: String,

    /// Edit format the agent starts in
    #[arg(long, env = "CODER_BRIDGE_EDIT_FORMAT", default_value = "diff")]
    pub edit_format: String,

    /// Approve every confirmation prompt
    #[arg(long, env = "CODER_BRIDGE_YES")]
    pub yes: bool,

    /// Undelivered notifications held before publishers wait
    #[arg(long, env = "CODER_BRIDGE_NOTIFICATION_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub notification_capacity: usize,

    /// Delay between announcing exit and terminating, in milliseconds
    #[arg(long, env = "CODER_BRIDGE_EXIT_GRACE_MS", default_value_t = 100)]
    pub exit_grace_ms: u64,

    /// Extra arguments passed to the agent program
    #[arg(last = true)]
    pub agent_args: Vec<String>,
}

impl Args {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| dirs_data_dir().join("coder-bridge"))
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("coder-bridge"))
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

fn dirs_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".local/share"))
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// bridge.json format
#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub agent: AgentProgram,
    /// Alias name → full model name; replaces the built-in table when present
    #[serde(default)]
    pub model_aliases: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentProgram {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for AgentProgram {
    fn default() -> Self {
        Self {
            program: "aider".to_string(),
            args: Vec::new(),
        }
    }
}

const DEFAULT_MODEL_ALIASES: &[(&str, &str)] = &[
    ("3", "gpt-3.5-turbo"),
    ("35-turbo", "gpt-3.5-turbo"),
    ("35turbo", "gpt-3.5-turbo"),
    ("4", "gpt-4-0613"),
    ("4-turbo", "gpt-4-1106-preview"),
    ("4o", "gpt-4o"),
    ("deepseek", "deepseek/deepseek-chat"),
    ("flash", "gemini/gemini-2.0-flash-exp"),
    ("haiku", "claude-3-5-haiku-20241022"),
    ("opus", "claude-3-opus-20240229"),
    ("r1", "deepseek/deepseek-reasoner"),
    ("sonnet", "anthropic/claude-3-5-sonnet-20241022"),
];

impl BridgeConfig {
    pub fn load(data_dir: &Path) -> Result<Self, String> {
        let path = data_dir.join("bridge.json");
        if !path.exists() {
            return Ok(BridgeConfig::default());
        }

        let content =
            std::fs::read_to_string(&path).map_err(|e| format!("Failed to read bridge.json: {e}"))?;

        serde_json::from_str(&content).map_err(|e| format!("Failed to parse bridge.json: {e}"))
    }

    pub fn alias_table(&self) -> HashMap<String, String> {
        match &self.model_aliases {
            Some(aliases) => aliases.clone(),
            None => DEFAULT_MODEL_ALIASES
                .iter()
                .map(|(alias, model)| (alias.to_string(), model.to_string()))
                .collect(),
        }
    }

    /// Aliases as reported by `list_models`, sorted by alias name.
    pub fn model_aliases(&self) -> Vec<ModelAlias> {
        let mut aliases: Vec<ModelAlias> = self
            .alias_table()
            .into_iter()
            .map(|(alias_name, model)| ModelAlias { alias_name, model })
            .collect();
        aliases.sort_by(|a, b| a.alias_name.cmp(&b.alias_name));
        aliases
    }
}
