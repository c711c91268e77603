use std::collections::VecDeque;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::codec::SentinelCodec;
use crate::error::BridgeError;
use crate::handlers::{self, Dispatched};
use crate::protocol::{Request, Response};
use crate::state::DaemonState;

/// Handle a single client connection
pub async fn handle_client(stream: TcpStream, state: Arc<DaemonState>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("[conn] Client connected: {peer}");

    if let Err(e) = handle_client_inner(stream, state).await {
        info!("[conn] Client {peer} error: {e}");
    }

    debug!("[conn] Client disconnected: {peer}");
}

async fn handle_client_inner(stream: TcpStream, state: Arc<DaemonState>) -> std::io::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = FramedRead::new(reader, SentinelCodec::new());
    let mut writer = FramedWrite::new(writer, SentinelCodec::new());
    // Frames that arrived while a long poll was pending
    let mut backlog: VecDeque<String> = VecDeque::new();

    loop {
        let frame = match backlog.pop_front() {
            Some(frame) => frame,
            None => match reader.next().await {
                Some(frame) => frame?,
                None => break,
            },
        };

        let request: Request = match serde_json::from_str(&frame) {
            Ok(r) => r,
            Err(e) => {
                let response = Response::failure(Value::Null, &BridgeError::Parse(e.to_string()));
                writer.send(response.to_json()).await?;
                break;
            }
        };

        let dispatched = if handlers::is_long_poll(&request.method) {
            // Race the poll against the client: if the connection closes
            // first the pending receive is dropped and nothing is lost.
            let poll = handlers::dispatch(&request, &state);
            tokio::pin!(poll);
            loop {
                tokio::select! {
                    dispatched = &mut poll => break dispatched,
                    frame = reader.next() => match frame {
                        Some(Ok(frame)) => backlog.push_back(frame),
                        Some(Err(e)) => return Err(e),
                        None => {
                            debug!("[conn] closed during {}", request.method);
                            return Ok(());
                        }
                    },
                }
            }
        } else {
            handlers::dispatch(&request, &state).await
        };

        let Dispatched {
            response,
            keep_alive,
        } = dispatched;
        writer.send(response).await?;
        if !keep_alive {
            break;
        }
    }

    Ok(())
}
