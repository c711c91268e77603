use super::{optional_params, to_result, HandlerResult};
use crate::error::BridgeError;
use crate::protocol::*;
use crate::state::DaemonState;

/// Parsing stops once more than this many entries were collected.
const MAX_HISTORY_ENTRIES: usize = 50;

const HISTORY_COMMANDS: [&str; 3] = ["/code ", "/ask ", "/architect "];

pub async fn handle_output_history(request: &Request, state: &DaemonState) -> HandlerResult {
    let range: OutputHistoryParams = optional_params(request)?;
    let lines = state
        .session
        .output_range(range.start_index, range.end_index)
        .await?;
    to_result(lines)
}

pub async fn handle_chat_history(_request: &Request, state: &DaemonState) -> HandlerResult {
    to_result(state.session.chat_transcript().await)
}

pub async fn handle_input_history(_request: &Request, state: &DaemonState) -> HandlerResult {
    let agent = state.session.agent().await.ok_or(BridgeError::NotInitialized)?;
    let rows = agent.input_history().await;
    to_result(parse_input_history(&rows))
}

/// Collect chat-mode inputs, newest first.
///
/// `rows` is oldest first. A multi-line input is stored as `{first`, middle
/// rows, `last}`; walking backwards, a row ending in `}` opens the block and
/// the command row closes it.
pub fn parse_input_history(rows: &[String]) -> Vec<ChatInputEntry> {
    let mut entries = Vec::new();
    let mut block: Vec<String> = Vec::new();

    for row in rows.iter().rev() {
        if row.ends_with('}') {
            let tail = row.trim_end_matches('}');
            block = if tail.is_empty() {
                Vec::new()
            } else {
                vec![tail.to_string()]
            };
            continue;
        }

        let row = row.trim_start_matches('{');
        if HISTORY_COMMANDS.iter().any(|prefix| row.starts_with(prefix)) {
            let (cmd, content) = row.split_once(' ').unwrap_or((row, ""));
            block.insert(0, content.to_string());
            entries.push(ChatInputEntry {
                cmd: cmd.to_string(),
                content: block.join("\n"),
            });
            block.clear();
        } else {
            block.insert(0, row.to_string());
        }

        if entries.len() > MAX_HISTORY_ENTRIES {
            break;
        }
    }
    entries
}
