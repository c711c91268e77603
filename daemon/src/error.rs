//! Error types for the bridge and its agent collaborator.

use thiserror::Error;

use crate::protocol::{
    AGENT_BUSY, AGENT_NOT_INITIALIZED, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
    PARSE_ERROR,
};

/// Errors raised by the agent collaborator.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent process: {0}")]
    Spawn(String),

    #[error("agent process failed: {0}")]
    Process(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("session file error: {0}")]
    SessionFile(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to RPC clients.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid request: {0}")]
    Parse(String),

    #[error("unknown method: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("agent not initialized")]
    NotInitialized,

    #[error("agent is running a command")]
    Busy,

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Numeric code carried in the response envelope.
    pub fn code(&self) -> i64 {
        match self {
            BridgeError::Parse(_) => PARSE_ERROR,
            BridgeError::MethodNotFound(_) => METHOD_NOT_FOUND,
            BridgeError::InvalidParams(_) => INVALID_PARAMS,
            BridgeError::NotInitialized => AGENT_NOT_INITIALIZED,
            BridgeError::Busy => AGENT_BUSY,
            BridgeError::Agent(_) | BridgeError::Io(_) | BridgeError::Internal(_) => INTERNAL_ERROR,
        }
    }
}
