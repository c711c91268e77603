use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{params, HandlerResult};
use crate::diagnostics::FileDiagnostics;
use crate::protocol::*;
use crate::state::DaemonState;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DiagnosticsParams {
    One(FileDiagnostics),
    Many(Vec<FileDiagnostics>),
}

/// Store diagnostics for the next `fix-diagnostics` turn. An empty batch
/// keeps whatever was stored before.
pub async fn handle_fix(request: &Request, state: &DaemonState) -> HandlerResult {
    let files = match params::<Option<DiagnosticsParams>>(request)? {
        None => Vec::new(),
        Some(DiagnosticsParams::One(file)) => vec![file],
        Some(DiagnosticsParams::Many(files)) => files,
    };
    info!("[diagnostics] received diagnostics for {} file(s)", files.len());
    state.session.set_diagnostics(files).await;
    Ok(json!(""))
}
