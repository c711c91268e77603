use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::{params, to_result, HandlerResult};
use crate::agent::Agent;
use crate::error::BridgeError;
use crate::notify::Notification;
use crate::protocol::*;
use crate::state::DaemonState;

/// Agent for clear/reset: `None` when there is nothing to clear yet.
async fn resettable_agent(state: &DaemonState) -> Result<Option<Arc<dyn Agent>>, BridgeError> {
    match state.session.idle_agent().await {
        Ok(agent) => Ok(Some(agent)),
        Err(BridgeError::NotInitialized) => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn handle_clear(_request: &Request, state: &DaemonState) -> HandlerResult {
    let Some(agent) = resettable_agent(state).await? else {
        return Ok(Value::Null);
    };
    agent.clear_history().await?;
    Ok(json!("clear success"))
}

pub async fn handle_reset(_request: &Request, state: &DaemonState) -> HandlerResult {
    let Some(agent) = resettable_agent(state).await? else {
        return Ok(Value::Null);
    };
    agent.reset().await?;
    Ok(json!("reset success"))
}

pub async fn handle_load(request: &Request, state: &DaemonState) -> HandlerResult {
    let path: PathBuf = params(request)?;
    let agent = state.session.idle_agent().await?;
    agent.load_session(&agent.abs_path(&path.to_string_lossy())).await?;
    Ok(json!("load session success"))
}

pub async fn handle_save(request: &Request, state: &DaemonState) -> HandlerResult {
    let path: PathBuf = params(request)?;
    let agent = state.session.idle_agent().await?;
    let path = agent.abs_path(&path.to_string_lossy());
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    agent.save_session(&path).await?;
    Ok(json!("save session success"))
}

pub async fn handle_announcements(_request: &Request, state: &DaemonState) -> HandlerResult {
    match state.session.agent().await {
        Some(agent) => to_result(agent.announcements().await),
        None => Ok(json!([])),
    }
}

pub async fn handle_info(_request: &Request, state: &DaemonState) -> HandlerResult {
    match state.session.agent().await {
        Some(agent) => to_result(agent.info().await),
        None => Ok(Value::Null),
    }
}

pub async fn handle_list_models(_request: &Request, state: &DaemonState) -> HandlerResult {
    to_result(&state.model_aliases)
}

pub async fn handle_run_command(request: &Request, state: &DaemonState) -> HandlerResult {
    let command: String = params(request)?;
    if command.trim().is_empty() {
        return Err(BridgeError::InvalidParams("empty command".to_string()));
    }
    state.submit_command(command).await?;
    to_result(RequestStatus::Queued)
}

/// Start shutdown and announce the exit. The process terminates once the
/// grace period has passed, whether or not the announcement was delivered.
pub async fn handle_exit(_request: &Request, state: &DaemonState) -> HandlerResult {
    info!("[session] exit requested");
    state.shutdown.cancel();
    let announce = state
        .session
        .notifications()
        .publish(Notification::AgentExited);
    if tokio::time::timeout(state.exit_grace, announce).await.is_err() {
        warn!("[session] notification queue full, exiting without announcement");
    }
    Ok(json!("exiting"))
}
