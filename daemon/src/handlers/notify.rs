use tracing::debug;

use super::{to_result, HandlerResult};
use crate::error::BridgeError;
use crate::protocol::*;
use crate::state::DaemonState;

/// Block until the next notification. The connection layer drops this
/// future when the client goes away; nothing is consumed in that case.
pub async fn handle(_request: &Request, state: &DaemonState) -> HandlerResult {
    let notification = state
        .session
        .notifications()
        .next()
        .await
        .ok_or_else(|| BridgeError::Internal("notification channel closed".to_string()))?;
    debug!("[notify] delivering {}", notification.kind());
    to_result(notification)
}
