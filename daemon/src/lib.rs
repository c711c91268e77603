//! Coder bridge: drives a coding agent on behalf of an editor front-end.
//!
//! Clients talk to the daemon over TCP with sentinel-framed JSON requests.
//! Agent turns are bracketed so every turn yields a change report, and
//! lifecycle events are delivered to a single long-polling subscriber.

pub mod agent;
pub mod codec;
pub mod command_agent;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod notify;
pub mod pending;
pub mod protocol;
pub mod runner;
pub mod state;
pub mod tracker;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use state::DaemonState;

/// Accept clients until shutdown is requested.
pub async fn serve(listener: TcpListener, state: Arc<DaemonState>) {
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                info!("[server] shutdown requested");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        connection::handle_client(stream, state).await;
                    });
                }
                Err(e) => {
                    error!("[server] Accept error: {e}");
                }
            },
        }
    }
}
