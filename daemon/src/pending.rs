//! File-set requests that arrive while the agent is busy or not yet created.
//!
//! A path lives in at most one of the three pending sets: queueing it for one
//! kind of operation removes it from the other two, so the last request wins.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::error::BridgeError;
use crate::protocol::RequestStatus;
use crate::state::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Add,
    Read,
    Drop,
}

impl FileOp {
    /// Reconciliation order.
    pub const ALL: [FileOp; 3] = [FileOp::Add, FileOp::Read, FileOp::Drop];

    pub fn as_str(self) -> &'static str {
        match self {
            FileOp::Add => "add",
            FileOp::Read => "read-only",
            FileOp::Drop => "drop",
        }
    }
}

/// The three pending sets, each kept in request order.
#[derive(Debug, Default, Clone)]
pub struct PendingOperations {
    add: Vec<String>,
    read: Vec<String>,
    drop: Vec<String>,
    /// Set while a reconcile is replaying batches it already took
    replaying: bool,
}

impl PendingOperations {
    fn set_mut(&mut self, op: FileOp) -> &mut Vec<String> {
        match op {
            FileOp::Add => &mut self.add,
            FileOp::Read => &mut self.read,
            FileOp::Drop => &mut self.drop,
        }
    }

    pub fn get(&self, op: FileOp) -> &[String] {
        match op {
            FileOp::Add => &self.add,
            FileOp::Read => &self.read,
            FileOp::Drop => &self.drop,
        }
    }

    pub fn queue(&mut self, op: FileOp, paths: &[String]) {
        for path in paths {
            for other in FileOp::ALL {
                self.set_mut(other).retain(|p| p != path);
            }
            self.set_mut(op).push(path.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.read.is_empty() && self.drop.is_empty()
    }

    /// Queued work exists or is being replayed. New requests must queue
    /// behind it so they are applied after it.
    pub fn is_settling(&self) -> bool {
        self.replaying || !self.is_empty()
    }

    /// Drain every non-empty set, in add, read, drop order.
    pub fn take(&mut self) -> Vec<(FileOp, Vec<String>)> {
        FileOp::ALL
            .into_iter()
            .filter_map(|op| {
                let paths = std::mem::take(self.set_mut(op));
                (!paths.is_empty()).then_some((op, paths))
            })
            .collect()
    }
}

async fn apply(agent: &Arc<dyn Agent>, op: FileOp, paths: &[String]) -> Result<(), BridgeError> {
    match op {
        FileOp::Add => agent.add_files(paths).await?,
        FileOp::Read => agent.mark_read_only(paths).await?,
        FileOp::Drop => agent.drop_files(paths).await?,
    }
    Ok(())
}

impl Session {
    /// Apply a file-set request now, or park it until the agent is idle.
    pub async fn request_files(
        &self,
        op: FileOp,
        paths: Vec<String>,
    ) -> Result<RequestStatus, BridgeError> {
        let agent = {
            let mut state = self.lock().await;
            match &state.agent {
                Some(agent) if !state.busy && !state.pending.is_settling() => agent.clone(),
                _ => {
                    debug!("[pending] queue {} {:?}", op.as_str(), paths);
                    state.pending.queue(op, &paths);
                    return Ok(RequestStatus::Queued);
                }
            }
        };

        // Lock released: the agent may call back into the session hooks.
        apply(&agent, op, &paths).await?;
        Ok(RequestStatus::Success)
    }

    /// Replay everything queued while the agent was unavailable, including
    /// requests that queue up behind the replay. Only one caller drains at a
    /// time; a concurrent call leaves the work to it.
    pub async fn reconcile(&self) {
        let agent = {
            let mut state = self.lock().await;
            let Some(agent) = state.agent.clone() else {
                return;
            };
            if state.pending.replaying {
                return;
            }
            state.pending.replaying = true;
            agent
        };

        loop {
            let batches = {
                let mut state = self.lock().await;
                let batches = state.pending.take();
                if batches.is_empty() {
                    state.pending.replaying = false;
                    return;
                }
                batches
            };

            for (op, paths) in batches {
                info!("[pending] replay {} {:?}", op.as_str(), paths);
                if let Err(e) = apply(&agent, op, &paths).await {
                    warn!("[pending] replay {} failed: {e}", op.as_str());
                }
            }
        }
    }
}
