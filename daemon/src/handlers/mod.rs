pub mod diagnostics;
pub mod files;
pub mod notify;
pub mod session;
pub mod transcript;

use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::pending::FileOp;
use crate::protocol::*;
use crate::state::DaemonState;

pub type HandlerResult = Result<Value, BridgeError>;

/// Encoded response plus whether the connection stays open for another
/// request.
#[derive(Debug)]
pub struct Dispatched {
    pub response: String,
    pub keep_alive: bool,
}

/// Methods whose connection stays open after the response.
pub fn is_long_poll(method: &str) -> bool {
    method == METHOD_NOTIFY
}

/// Dispatch a request to the appropriate handler
pub async fn dispatch(request: &Request, state: &DaemonState) -> Dispatched {
    let start = Instant::now();
    let method = request.method.as_str();
    let id = &request.id;

    debug!("[dispatch] → id={} method={}", id, method);

    let result = match method {
        METHOD_LIST_FILES => files::handle_list(request, state).await,
        METHOD_ADD_FILES => files::handle_request(request, state, FileOp::Add).await,
        METHOD_READ_FILES => files::handle_request(request, state, FileOp::Read).await,
        METHOD_DROP => files::handle_request(request, state, FileOp::Drop).await,
        METHOD_EXCHANGE_FILES => files::handle_exchange(request, state).await,
        METHOD_CLEAR => session::handle_clear(request, state).await,
        METHOD_RESET => session::handle_reset(request, state).await,
        METHOD_LOAD => session::handle_load(request, state).await,
        METHOD_SAVE => session::handle_save(request, state).await,
        METHOD_FIX_DIAGNOSTIC => diagnostics::handle_fix(request, state).await,
        METHOD_GET_OUTPUT_HISTORY => transcript::handle_output_history(request, state).await,
        METHOD_CHAT_HISTORY => transcript::handle_chat_history(request, state).await,
        METHOD_GET_HISTORY => transcript::handle_input_history(request, state).await,
        METHOD_GET_ANNOUNCEMENTS => session::handle_announcements(request, state).await,
        METHOD_GET_CODER_INFO => session::handle_info(request, state).await,
        METHOD_LIST_MODELS => session::handle_list_models(request, state).await,
        METHOD_RUN_COMMAND => session::handle_run_command(request, state).await,
        METHOD_NOTIFY => notify::handle(request, state).await,
        METHOD_EXIT => session::handle_exit(request, state).await,
        _ => {
            warn!("[dispatch] Unknown method: {}", method);
            Err(BridgeError::MethodNotFound(method.to_string()))
        }
    };

    let response = match &result {
        Ok(value) => Response::success(id.clone(), value),
        Err(e) => Response::failure(id.clone(), e),
    };

    let elapsed = start.elapsed();
    if response.is_error() {
        info!("[dispatch] ← id={} method={} error elapsed={:?}", id, method, elapsed);
    } else {
        debug!("[dispatch] ← id={} method={} ok elapsed={:?}", id, method, elapsed);
    }

    Dispatched {
        response: response.to_json(),
        keep_alive: is_long_poll(method),
    }
}

/// Decode required params.
pub(crate) fn params<T: DeserializeOwned>(request: &Request) -> Result<T, BridgeError> {
    serde_json::from_value(request.params.clone())
        .map_err(|e| BridgeError::InvalidParams(format!("{}: {e}", request.method)))
}

/// Decode params that may be omitted entirely.
pub(crate) fn optional_params<T: DeserializeOwned + Default>(
    request: &Request,
) -> Result<T, BridgeError> {
    if request.params.is_null() {
        return Ok(T::default());
    }
    params(request)
}

pub(crate) fn to_result<T: Serialize>(value: T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| BridgeError::Internal(format!("encode result: {e}")))
}
