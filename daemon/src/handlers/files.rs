use tracing::info;

use super::{params, to_result, HandlerResult};
use crate::pending::FileOp;
use crate::protocol::*;
use crate::state::DaemonState;

pub async fn handle_list(_request: &Request, state: &DaemonState) -> HandlerResult {
    let result = match state.session.agent().await {
        Some(agent) => FileListResult {
            added: agent.in_chat_files().await,
            readonly: agent.read_only_files().await,
        },
        None => FileListResult {
            added: vec![],
            readonly: vec![],
        },
    };
    to_result(result)
}

/// add_files, read_files and drop: applied now, or queued while the agent is
/// busy or not yet started.
pub async fn handle_request(request: &Request, state: &DaemonState, op: FileOp) -> HandlerResult {
    let paths = params::<FilePathsParams>(request)?.into_vec();
    let status = state.session.request_files(op, paths).await?;
    to_result(status)
}

/// Move each path to the other set: editable becomes read-only and
/// everything else becomes editable.
pub async fn handle_exchange(request: &Request, state: &DaemonState) -> HandlerResult {
    let paths = params::<FilePathsParams>(request)?.into_vec();
    let agent = state.session.idle_agent().await?;

    let editable = agent.in_chat_files().await;
    agent.drop_files(&paths).await?;
    for path in &paths {
        if editable.contains(&agent.rel_path(path)) {
            agent.mark_read_only(std::slice::from_ref(path)).await?;
        } else {
            agent.add_files(std::slice::from_ref(path)).await?;
        }
    }
    info!("[files] exchanged {} file(s)", paths.len());
    to_result(RequestStatus::Success)
}

#[cfg(test)]
mod tests {
    use super::super::tests::{call, fixture, with_agent};
    use crate::agent::Agent;
    use crate::protocol::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn idle_requests_apply_and_list() {
        let fixture = fixture();
        let _agent = with_agent(&fixture).await;

        let response = call(&fixture.state, METHOD_ADD_FILES, json!(["a.py", "b.py"])).await;
        assert_eq!(response["result"], json!("success"));
        call(&fixture.state, METHOD_READ_FILES, json!("docs.md")).await;
        call(&fixture.state, METHOD_DROP, json!("b.py")).await;

        let listed = call(&fixture.state, METHOD_LIST_FILES, Value::Null).await;
        assert_eq!(
            listed["result"],
            json!({"added": ["a.py"], "readonly": ["docs.md"]})
        );
    }

    #[tokio::test]
    async fn exchange_swaps_sets() {
        let fixture = fixture();
        let agent = with_agent(&fixture).await;
        agent.add_files(&["a.py".to_string()]).await.expect("add");
        agent.mark_read_only(&["b.md".to_string()]).await.expect("read");

        let response = call(&fixture.state, METHOD_EXCHANGE_FILES, json!(["a.py", "b.md"])).await;
        assert_eq!(response["result"], json!("success"));
        assert_eq!(agent.in_chat_files().await, vec!["b.md".to_string()]);
        assert_eq!(agent.read_only_files().await, vec!["a.py".to_string()]);
    }

    #[tokio::test]
    async fn exchange_requires_agent() {
        let fixture = fixture();
        let response = call(&fixture.state, METHOD_EXCHANGE_FILES, json!(["a.py"])).await;
        assert_eq!(response["error"]["code"], json!(AGENT_NOT_INITIALIZED));
    }
}
