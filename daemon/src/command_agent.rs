//! Agent backed by an external command-line coding agent.
//!
//! The file sets, chat history and input history live here; each prompt turn
//! spawns the configured program once with the current files and the message,
//! streams its stdout into the turn hooks and answers confirmation prompts on
//! its stdin. File-set and mode commands are handled without spawning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::{
    Agent, AgentFactory, AgentInfo, ConfirmPrompt, ModeSwitch, TurnHooks, TurnOutcome,
};
use crate::error::AgentError;

const APPLIED_EDIT_PREFIX: &str = "Applied edit to ";

/// How to launch the agent program, and the mode it starts in.
#[derive(Debug, Clone)]
pub struct CommandAgentConfig {
    pub program: String,
    pub args: Vec<String>,
    pub root: PathBuf,
    pub model: String,
    pub edit_format: String,
    pub auto_approve: bool,
}

#[derive(Debug, Default)]
struct FileSets {
    editable: Vec<String>,
    read_only: Vec<String>,
}

pub struct CommandAgent {
    config: CommandAgentConfig,
    files: Mutex<FileSets>,
    /// Prompts sent since the last clear
    history: Mutex<Vec<String>>,
    /// Input history rows, oldest first
    inputs: Mutex<Vec<String>>,
}

impl CommandAgent {
    pub fn new(config: CommandAgentConfig) -> Self {
        Self {
            config,
            files: Mutex::new(FileSets::default()),
            history: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Chat-mode command a plain prompt runs as.
    fn mode_command(&self) -> &'static str {
        match self.config.edit_format.as_str() {
            "ask" => "/ask",
            "architect" => "/architect",
            _ => "/code",
        }
    }

    /// Record a message in input-history form: multi-line messages are
    /// wrapped in `{` ... `}` rows.
    async fn record_input(&self, message: &str) {
        let message = message.trim();
        if message.is_empty() {
            return;
        }
        let entry = if message.starts_with('/') {
            message.to_string()
        } else {
            format!("{} {message}", self.mode_command())
        };

        let lines: Vec<&str> = entry.lines().collect();
        let mut inputs = self.inputs.lock().await;
        match lines.as_slice() {
            [single] => inputs.push(single.to_string()),
            [first, middle @ .., last] => {
                inputs.push(format!("{{{first}"));
                inputs.extend(middle.iter().map(|l| l.to_string()));
                inputs.push(format!("{last}}}"));
            }
            [] => {}
        }
    }

    /// Handle commands that only touch local state. `None` means the message
    /// goes to the program.
    async fn run_local(
        &self,
        message: &str,
        hooks: &dyn TurnHooks,
    ) -> Result<Option<TurnOutcome>, AgentError> {
        let (command, rest) = match message.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (message, ""),
        };
        let args: Vec<String> = rest.split_whitespace().map(str::to_string).collect();

        let report: Vec<String> = match command {
            "/add" => {
                self.add_files(&args).await?;
                args.iter().map(|p| format!("Added {p} to the chat")).collect()
            }
            "/read-only" => {
                self.mark_read_only(&args).await?;
                args.iter()
                    .map(|p| format!("Added {p} to read-only files"))
                    .collect()
            }
            "/drop" if args.is_empty() => {
                *self.files.lock().await = FileSets::default();
                vec!["Dropping all files from the chat session.".to_string()]
            }
            "/drop" => {
                self.drop_files(&args).await?;
                args.iter()
                    .map(|p| format!("Removed {p} from the chat"))
                    .collect()
            }
            "/clear" => {
                self.clear_history().await?;
                vec!["All chat history cleared.".to_string()]
            }
            "/reset" => {
                self.reset().await?;
                vec!["All files dropped and chat history cleared.".to_string()]
            }
            "/chat-mode" => {
                return Ok(Some(TurnOutcome::SwitchMode(ModeSwitch {
                    edit_format: Some(required_arg(command, rest)?),
                    model: None,
                })))
            }
            "/model" => {
                return Ok(Some(TurnOutcome::SwitchMode(ModeSwitch {
                    edit_format: None,
                    model: Some(required_arg(command, rest)?),
                })))
            }
            _ => return Ok(None),
        };

        hooks.tool_output(&report).await;
        Ok(Some(TurnOutcome::Completed))
    }

    /// Run the program for one prompt.
    async fn spawn_turn(&self, message: &str, hooks: &dyn TurnHooks) -> Result<(), AgentError> {
        let (editable, read_only) = {
            let files = self.files.lock().await;
            (files.editable.clone(), files.read_only.clone())
        };
        for path in &editable {
            hooks
                .before_write(&self.abs_path(path).to_string_lossy())
                .await;
        }

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--edit-format")
            .arg(&self.config.edit_format);
        for path in &editable {
            command.arg("--file").arg(path);
        }
        for path in &read_only {
            command.arg("--read").arg(path);
        }
        if self.config.auto_approve {
            command.arg("--yes-always");
        }
        command
            .arg("--message")
            .arg(message)
            .current_dir(&self.config.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            "[agent] spawning {} ({} editable, {} read-only)",
            self.config.program,
            editable.len(),
            read_only.len()
        );
        let mut child = command
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{}: {e}", self.config.program)))?;
        debug!("[agent] pid={:?}", child.id());

        let mut stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("stdout not captured".to_string()))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        let mut scanner = OutputScanner::default();
        let mut buf = [0u8; 4096];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            for event in scanner.push(&buf[..n]) {
                self.handle_output(event, hooks, &mut stdin).await?;
            }
        }
        if let Some(line) = scanner.finish() {
            hooks.tool_output(&[line]).await;
        }
        drop(stdin);

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            warn!("[agent] {} exited with {status}", self.config.program);
            return Err(AgentError::Process(format!(
                "{} exited with {status}: {}",
                self.config.program,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn handle_output(
        &self,
        event: OutputEvent,
        hooks: &dyn TurnHooks,
        stdin: &mut Option<ChildStdin>,
    ) -> Result<(), AgentError> {
        let prompt = match event {
            OutputEvent::Line(line) => {
                if let Some(path) = applied_edit_path(&line) {
                    hooks.after_write(&self.abs_path(path).to_string_lossy()).await;
                }
                hooks.tool_output(&[line]).await;
                return Ok(());
            }
            OutputEvent::Prompt(prompt) => prompt,
        };

        let accepted = self.config.auto_approve
            || prompt
                .default
                .as_deref()
                .is_some_and(|d| d.to_ascii_lowercase().starts_with('y'));
        hooks.confirm_asked(prompt).await;

        if let Some(stdin) = stdin.as_mut() {
            stdin
                .write_all(if accepted { b"y\n" } else { b"n\n" })
                .await?;
            stdin.flush().await?;
        }
        hooks.confirm_answered(accepted).await;
        Ok(())
    }
}

/// Path from the program's `Applied edit to <path>` report line.
fn applied_edit_path(line: &str) -> Option<&str> {
    let path = line.trim().strip_prefix(APPLIED_EDIT_PREFIX)?.trim();
    (!path.is_empty()).then_some(path)
}

fn required_arg(command: &str, rest: &str) -> Result<String, AgentError> {
    if rest.is_empty() {
        return Err(AgentError::InvalidCommand(format!("{command} needs an argument")));
    }
    Ok(rest.to_string())
}

fn push_unique(set: &mut Vec<String>, path: String) {
    if !set.contains(&path) {
        set.push(path);
    }
}

#[async_trait]
impl Agent for CommandAgent {
    async fn run_turn(
        &self,
        message: &str,
        hooks: &dyn TurnHooks,
    ) -> Result<TurnOutcome, AgentError> {
        self.record_input(message).await;
        let message = message.trim();
        if message.is_empty() {
            return Ok(TurnOutcome::Completed);
        }
        if let Some(outcome) = self.run_local(message, hooks).await? {
            return Ok(outcome);
        }

        hooks
            .append_chat_history(&format!("#### {message}"), true, false, true)
            .await;
        self.history.lock().await.push(message.to_string());
        self.spawn_turn(message, hooks).await?;
        Ok(TurnOutcome::Completed)
    }

    async fn add_files(&self, paths: &[String]) -> Result<(), AgentError> {
        let mut files = self.files.lock().await;
        for path in paths {
            let rel = self.rel_path(path);
            files.read_only.retain(|p| *p != rel);
            push_unique(&mut files.editable, rel);
        }
        Ok(())
    }

    async fn mark_read_only(&self, paths: &[String]) -> Result<(), AgentError> {
        let mut files = self.files.lock().await;
        for path in paths {
            let rel = self.rel_path(path);
            files.editable.retain(|p| *p != rel);
            push_unique(&mut files.read_only, rel);
        }
        Ok(())
    }

    async fn drop_files(&self, paths: &[String]) -> Result<(), AgentError> {
        let rels: Vec<String> = paths.iter().map(|p| self.rel_path(p)).collect();
        let mut files = self.files.lock().await;
        files.editable.retain(|p| !rels.contains(p));
        files.read_only.retain(|p| !rels.contains(p));
        Ok(())
    }

    async fn clear_history(&self) -> Result<(), AgentError> {
        self.history.lock().await.clear();
        Ok(())
    }

    async fn reset(&self) -> Result<(), AgentError> {
        *self.files.lock().await = FileSets::default();
        self.history.lock().await.clear();
        Ok(())
    }

    async fn load_session(&self, path: &Path) -> Result<(), AgentError> {
        let script = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::SessionFile(format!("{}: {e}", path.display())))?;

        for line in script.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.split_once(char::is_whitespace) {
                None if line == "/drop" => *self.files.lock().await = FileSets::default(),
                Some(("/add", path)) => self.add_files(&[path.trim().to_string()]).await?,
                Some(("/read-only", path)) => {
                    self.mark_read_only(&[path.trim().to_string()]).await?
                }
                _ => debug!("[agent] ignoring session line {line:?}"),
            }
        }
        info!("[agent] loaded session from {}", path.display());
        Ok(())
    }

    async fn save_session(&self, path: &Path) -> Result<(), AgentError> {
        let mut script = String::from("/drop\n");
        {
            let files = self.files.lock().await;
            for path in &files.editable {
                script.push_str(&format!("/add {path}\n"));
            }
            for path in &files.read_only {
                script.push_str(&format!("/read-only {path}\n"));
            }
        }
        tokio::fs::write(path, script).await?;
        info!("[agent] saved session to {}", path.display());
        Ok(())
    }

    async fn clone_detached(&self) -> Result<Arc<dyn Agent>, AgentError> {
        Ok(Arc::new(CommandAgent::new(self.config.clone())))
    }

    async fn in_chat_files(&self) -> Vec<String> {
        self.files.lock().await.editable.clone()
    }

    async fn read_only_files(&self) -> Vec<String> {
        self.files.lock().await.read_only.clone()
    }

    async fn announcements(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Agent: {}", self.config.program),
            format!(
                "Model: {} with {} edit format",
                self.config.model, self.config.edit_format
            ),
            format!("Root: {}", self.config.root.display()),
        ];
        if self.config.auto_approve {
            lines.push("Confirmations are approved automatically".to_string());
        }
        let history = self.history.lock().await.len();
        if history > 0 {
            lines.push(format!("Chat history: {history} message(s)"));
        }
        lines
    }

    async fn info(&self) -> AgentInfo {
        AgentInfo {
            main_model: self.config.model.clone(),
            edit_format: self.config.edit_format.clone(),
            cwd: self.config.root.to_string_lossy().to_string(),
        }
    }

    async fn input_history(&self) -> Vec<String> {
        self.inputs.lock().await.clone()
    }

    async fn chat_messages(&self) -> Vec<String> {
        self.history.lock().await.clone()
    }

    fn auto_approve(&self) -> bool {
        self.config.auto_approve
    }

    fn root(&self) -> &Path {
        &self.config.root
    }
}

/// Builds [`CommandAgent`]s and their mode-switch replacements.
pub struct CommandAgentFactory {
    template: CommandAgentConfig,
    model_aliases: HashMap<String, String>,
}

impl CommandAgentFactory {
    pub fn new(template: CommandAgentConfig, model_aliases: HashMap<String, String>) -> Self {
        Self {
            template,
            model_aliases,
        }
    }

    fn resolve_model(&self, name: &str) -> String {
        self.model_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

#[async_trait]
impl AgentFactory for CommandAgentFactory {
    async fn create(&self) -> Result<Arc<dyn Agent>, AgentError> {
        let mut config = self.template.clone();
        config.model = self.resolve_model(&config.model);
        info!(
            "[agent] creating {} agent in {}",
            config.program,
            config.root.display()
        );
        Ok(Arc::new(CommandAgent::new(config)))
    }

    async fn switch(
        &self,
        current: &Arc<dyn Agent>,
        switch: ModeSwitch,
    ) -> Result<Arc<dyn Agent>, AgentError> {
        let info = current.info().await;
        let mut config = self.template.clone();
        config.model = switch
            .model
            .map(|m| self.resolve_model(&m))
            .unwrap_or(info.main_model);
        config.edit_format = switch.edit_format.unwrap_or(info.edit_format);
        info!(
            "[agent] switching to model={} edit_format={}",
            config.model, config.edit_format
        );

        let replacement = CommandAgent::new(config);
        replacement.add_files(&current.in_chat_files().await).await?;
        replacement
            .mark_read_only(&current.read_only_files().await)
            .await?;
        *replacement.inputs.lock().await = current.input_history().await;
        *replacement.history.lock().await = current.chat_messages().await;
        Ok(Arc::new(replacement))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OutputEvent {
    Line(String),
    Prompt(ConfirmPrompt),
}

/// Splits program output into lines, and recognises confirmation prompts
/// even when they are not newline-terminated.
#[derive(Debug, Default)]
struct OutputScanner {
    pending: Vec<u8>,
}

impl OutputScanner {
    fn push(&mut self, chunk: &[u8]) -> Vec<OutputEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            events.push(match parse_confirm(&line) {
                Some(prompt) => OutputEvent::Prompt(prompt),
                None => OutputEvent::Line(line),
            });
        }

        if let Some(prompt) = parse_confirm(&String::from_utf8_lossy(&self.pending)) {
            self.pending.clear();
            events.push(OutputEvent::Prompt(prompt));
        }
        events
    }

    fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Parse `Question? (Y)es/(N)o/(A)ll [Yes]:` style prompts.
fn parse_confirm(line: &str) -> Option<ConfirmPrompt> {
    let line = line.trim_end();
    let start = line.find("(Y)es")?;
    let choices = line[start..].strip_suffix(':')?.trim();

    let (choices, default) = match choices.rfind('[') {
        Some(open) => (
            &choices[..open],
            choices[open + 1..]
                .strip_suffix(']')
                .map(|d| d.trim().to_string()),
        ),
        None => (choices, None),
    };
    let options: Vec<String> = choices
        .trim()
        .split('/')
        .map(|o| o.replace(['(', ')'], "").trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();

    let question = line[..start].trim().to_string();
    let group = options
        .iter()
        .any(|o| o == "All")
        .then(|| question.clone());
    Some(ConfirmPrompt {
        question,
        options,
        default,
        group,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingHooks {
        writes: StdMutex<Vec<String>>,
        created: StdMutex<Vec<String>>,
        output: StdMutex<Vec<String>>,
        chat: StdMutex<Vec<String>>,
        confirms: StdMutex<Vec<(String, Option<bool>)>>,
    }

    #[async_trait]
    impl TurnHooks for RecordingHooks {
        async fn before_write(&self, path: &str) {
            self.writes.lock().unwrap().push(path.to_string());
        }

        async fn after_write(&self, path: &str) {
            self.created.lock().unwrap().push(path.to_string());
        }

        async fn tool_output(&self, lines: &[String]) {
            self.output.lock().unwrap().extend(lines.iter().cloned());
        }

        async fn append_chat_history(
            &self,
            text: &str,
            _linebreak: bool,
            _blockquote: bool,
            _strip: bool,
        ) {
            self.chat.lock().unwrap().push(text.to_string());
        }

        async fn confirm_asked(&self, prompt: ConfirmPrompt) {
            self.confirms.lock().unwrap().push((prompt.question, None));
        }

        async fn confirm_answered(&self, accepted: bool) {
            if let Some(last) = self.confirms.lock().unwrap().last_mut() {
                last.1 = Some(accepted);
            }
        }
    }

    fn config(root: &Path, program: &str, args: &[&str]) -> CommandAgentConfig {
        CommandAgentConfig {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            root: root.to_path_buf(),
            model: "sonnet".to_string(),
            edit_format: "diff".to_string(),
            auto_approve: false,
        }
    }

    #[test]
    fn parses_confirm_prompts() {
        let prompt =
            parse_confirm("Create new file src/x.py? (Y)es/(N)o [Yes]: ").expect("prompt");
        assert_eq!(prompt.question, "Create new file src/x.py?");
        assert_eq!(prompt.options, vec!["Yes".to_string(), "No".to_string()]);
        assert_eq!(prompt.default.as_deref(), Some("Yes"));
        assert_eq!(prompt.group, None);

        let grouped = parse_confirm("Add file? (Y)es/(N)o/(A)ll/(S)kip all [No]:").expect("prompt");
        assert_eq!(grouped.options.len(), 4);
        assert_eq!(grouped.default.as_deref(), Some("No"));
        assert_eq!(grouped.group.as_deref(), Some("Add file?"));

        assert!(parse_confirm("Yes, I changed it").is_none());
        assert!(parse_confirm("(Y)es/(N)o appears mid sentence").is_none());
    }

    #[test]
    fn scanner_joins_chunks_and_catches_open_prompts() {
        let mut scanner = OutputScanner::default();
        assert!(scanner.push(b"Applied ed").is_empty());
        assert_eq!(
            scanner.push(b"it to a.py\nRun tests? (Y)es/(N)o [Yes]: "),
            vec![
                OutputEvent::Line("Applied edit to a.py".to_string()),
                OutputEvent::Prompt(ConfirmPrompt {
                    question: "Run tests?".to_string(),
                    options: vec!["Yes".to_string(), "No".to_string()],
                    default: Some("Yes".to_string()),
                    group: None,
                }),
            ]
        );
        assert!(scanner.push(b"tail").is_empty());
        assert_eq!(scanner.finish().as_deref(), Some("tail"));
        assert_eq!(scanner.finish(), None);
    }

    #[tokio::test]
    async fn local_commands_manage_file_sets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new(config(dir.path(), "unused", &[]));
        let hooks = RecordingHooks::default();
        let abs = dir.path().join("src/lib.rs").to_string_lossy().to_string();

        agent.run_turn(&format!("/add {abs} b.py"), &hooks).await.expect("add");
        assert_eq!(
            agent.in_chat_files().await,
            vec!["src/lib.rs".to_string(), "b.py".to_string()]
        );

        agent.run_turn("/read-only b.py", &hooks).await.expect("read-only");
        assert_eq!(agent.in_chat_files().await, vec!["src/lib.rs".to_string()]);
        assert_eq!(agent.read_only_files().await, vec!["b.py".to_string()]);

        agent.run_turn("/drop", &hooks).await.expect("drop");
        assert!(agent.in_chat_files().await.is_empty());
        assert!(agent.read_only_files().await.is_empty());
        assert!(hooks.writes.lock().unwrap().is_empty());
        assert_eq!(
            hooks.output.lock().unwrap().last().map(String::as_str),
            Some("Dropping all files from the chat session.")
        );
    }

    #[tokio::test]
    async fn mode_commands_request_switch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new(config(dir.path(), "unused", &[]));
        let hooks = RecordingHooks::default();

        let outcome = agent.run_turn("/chat-mode architect", &hooks).await.expect("switch");
        assert_eq!(
            outcome,
            TurnOutcome::SwitchMode(ModeSwitch {
                edit_format: Some("architect".to_string()),
                model: None,
            })
        );
        assert!(matches!(
            agent.run_turn("/model", &hooks).await,
            Err(AgentError::InvalidCommand(_))
        ));
    }

    #[tokio::test]
    async fn input_history_wraps_multiline_messages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new(config(dir.path(), "unused", &[]));
        let hooks = RecordingHooks::default();

        agent.run_turn("/add a.py", &hooks).await.expect("add");
        agent.record_input("fix the bug\nin a.py").await;

        assert_eq!(
            agent.input_history().await,
            vec![
                "/add a.py".to_string(),
                "{/code fix the bug".to_string(),
                "in a.py}".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn session_script_restores_file_sets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new(config(dir.path(), "unused", &[]));
        agent.add_files(&["a.py".to_string()]).await.expect("add");
        agent.mark_read_only(&["docs.md".to_string()]).await.expect("read");

        let script = dir.path().join("session.txt");
        agent.save_session(&script).await.expect("save");
        assert_eq!(
            std::fs::read_to_string(&script).expect("script"),
            "/drop\n/add a.py\n/read-only docs.md\n"
        );

        let fresh = CommandAgent::new(config(dir.path(), "unused", &[]));
        fresh.add_files(&["stale.py".to_string()]).await.expect("add");
        fresh.load_session(&script).await.expect("load");
        assert_eq!(fresh.in_chat_files().await, vec!["a.py".to_string()]);
        assert_eq!(fresh.read_only_files().await, vec!["docs.md".to_string()]);

        assert!(matches!(
            fresh.load_session(&dir.path().join("missing.txt")).await,
            Err(AgentError::SessionFile(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prompt_turn_streams_output_and_answers_confirms() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = r#"echo "Applied edit"; printf 'Commit changes? (Y)es/(N)o [Yes]: '; read answer; echo "answer=$answer""#;
        let agent = CommandAgent::new(config(dir.path(), "sh", &["-c", script, "sh"]));
        agent.add_files(&["a.py".to_string()]).await.expect("add");
        let hooks = RecordingHooks::default();

        let outcome = agent.run_turn("make it faster", &hooks).await.expect("turn");
        assert_eq!(outcome, TurnOutcome::Completed);

        assert_eq!(
            *hooks.writes.lock().unwrap(),
            vec![dir.path().join("a.py").to_string_lossy().to_string()]
        );
        assert_eq!(
            *hooks.output.lock().unwrap(),
            vec!["Applied edit".to_string(), "answer=y".to_string()]
        );
        assert_eq!(
            *hooks.confirms.lock().unwrap(),
            vec![("Commit changes?".to_string(), Some(true))]
        );
        assert_eq!(
            *hooks.chat.lock().unwrap(),
            vec!["#### make it faster".to_string()]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_program_is_a_process_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new(config(dir.path(), "sh", &["-c", "echo broken >&2; exit 3", "sh"]));
        let result = agent.run_turn("anything", &RecordingHooks::default()).await;
        match result {
            Err(AgentError::Process(message)) => assert!(message.contains("broken")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new(config(dir.path(), "coder-bridge-no-such-program", &[]));
        assert!(matches!(
            agent.run_turn("hello", &RecordingHooks::default()).await,
            Err(AgentError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn factory_switch_keeps_files_and_resolves_aliases() {
        let dir = tempfile::tempdir().expect("tempdir");
        let aliases = HashMap::from([("opus".to_string(), "claude-opus".to_string())]);
        let factory = CommandAgentFactory::new(config(dir.path(), "unused", &[]), aliases);

        let current = factory.create().await.expect("create");
        current.add_files(&["a.py".to_string()]).await.expect("add");
        current.mark_read_only(&["b.md".to_string()]).await.expect("read");

        let next = factory
            .switch(
                &current,
                ModeSwitch {
                    edit_format: None,
                    model: Some("opus".to_string()),
                },
            )
            .await
            .expect("switch");
        let info = next.info().await;
        assert_eq!(info.main_model, "claude-opus");
        assert_eq!(info.edit_format, "diff");
        assert_eq!(next.in_chat_files().await, vec!["a.py".to_string()]);
        assert_eq!(next.read_only_files().await, vec!["b.md".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn factory_switch_keeps_conversation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = CommandAgentFactory::new(
            config(dir.path(), "sh", &["-c", "echo thinking"]),
            HashMap::new(),
        );
        let current = factory.create().await.expect("create");
        current
            .run_turn("/ask what changed?", &RecordingHooks::default())
            .await
            .expect("turn");
        let conversation = current.chat_messages().await;
        assert_eq!(conversation.len(), 1);

        let next = factory
            .switch(
                &current,
                ModeSwitch {
                    edit_format: Some("whole".to_string()),
                    model: None,
                },
            )
            .await
            .expect("switch");
        assert_eq!(next.chat_messages().await, conversation);
        assert_eq!(next.input_history().await, current.input_history().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn applied_edit_reports_created_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = "printf 'x\\n' > new.py; echo 'Applied edit to new.py'";
        let agent = CommandAgent::new(config(dir.path(), "sh", &["-c", script]));
        let hooks = RecordingHooks::default();

        agent.run_turn("make a file", &hooks).await.expect("turn");
        let created = dir.path().join("new.py").to_string_lossy().to_string();
        assert_eq!(*hooks.created.lock().unwrap(), vec![created]);
        assert!(hooks.writes.lock().unwrap().is_empty());
        assert_eq!(applied_edit_path("Applied edit to src/a b.py "), Some("src/a b.py"));
        assert_eq!(applied_edit_path("Applied edit to "), None);
    }
}
