//! End-to-end: a real listener, the turn runner and a shell-script agent.
#![cfg(unix)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use coder_bridge::codec::SentinelCodec;
use coder_bridge::command_agent::{CommandAgentConfig, CommandAgentFactory};
use coder_bridge::notify::Notification;
use coder_bridge::runner::{self, TurnRunner};
use coder_bridge::state::{DaemonState, Session};

const AGENT_SCRIPT: &str = r#"echo compiling; echo "Commit abc123: fix bug"; echo done"#;

struct Daemon {
    addr: SocketAddr,
    state: Arc<DaemonState>,
    server: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

async fn start() -> Daemon {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.py"), "print('hi')\n").expect("seed file");

    let session = Arc::new(Session::new(&dir.path().join("scratch"), 64));
    let (tx, rx) = runner::command_channel();
    let shutdown = CancellationToken::new();
    let state = Arc::new(DaemonState::new(
        session.clone(),
        tx,
        shutdown.clone(),
        vec![],
        Duration::from_millis(10),
    ));

    let factory = Arc::new(CommandAgentFactory::new(
        CommandAgentConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), AGENT_SCRIPT.to_string(), "sh".to_string()],
            root: dir.path().to_path_buf(),
            model: "test-model".to_string(),
            edit_format: "diff".to_string(),
            auto_approve: false,
        },
        HashMap::new(),
    ));
    tokio::spawn(TurnRunner::new(session, factory, rx, shutdown).run());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = tokio::spawn(coder_bridge::serve(listener, state.clone()));

    Daemon {
        addr,
        state,
        server,
        _dir: dir,
    }
}

async fn connect(addr: SocketAddr) -> Framed<TcpStream, SentinelCodec> {
    let stream = TcpStream::connect(addr).await.expect("connect");
    Framed::new(stream, SentinelCodec::new())
}

async fn send(conn: &mut Framed<TcpStream, SentinelCodec>, id: u64, method: &str, params: Value) {
    let request = json!({"id": id, "method": method, "params": params});
    conn.send(request.to_string()).await.expect("send");
}

async fn receive(conn: &mut Framed<TcpStream, SentinelCodec>) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), conn.next())
        .await
        .expect("response in time")
        .expect("frame")
        .expect("decode");
    serde_json::from_str(&frame).expect("response json")
}

/// One request on a fresh connection; the daemon must close it afterwards.
async fn call(addr: SocketAddr, method: &str, params: Value) -> Value {
    let mut conn = connect(addr).await;
    send(&mut conn, 1, method, params).await;
    let response = receive(&mut conn).await;
    let closed = tokio::time::timeout(Duration::from_secs(5), conn.next())
        .await
        .expect("close in time");
    assert!(closed.is_none(), "{method} should close the connection");
    response
}

#[tokio::test]
async fn commit_turn_over_tcp() {
    let daemon = start().await;

    let mut subscriber = connect(daemon.addr).await;
    send(&mut subscriber, 1, "notify", Value::Null).await;
    assert_eq!(receive(&mut subscriber).await["result"]["type"], json!("agent_started"));

    let added = call(daemon.addr, "add_files", json!(["a.py"])).await;
    assert_eq!(added["result"], json!("success"));
    let listed = call(daemon.addr, "list_files", Value::Null).await;
    assert_eq!(listed["result"], json!({"added": ["a.py"], "readonly": []}));

    let queued = call(daemon.addr, "run_command", json!("/commit")).await;
    assert_eq!(queued["result"], json!("queued"));

    send(&mut subscriber, 2, "notify", Value::Null).await;
    let started = receive(&mut subscriber).await;
    assert_eq!(started["id"], json!(2));
    assert_eq!(
        started["result"],
        json!({"type": "turn_started", "command": "/commit"})
    );

    send(&mut subscriber, 3, "notify", Value::Null).await;
    let completed = receive(&mut subscriber).await["result"].clone();
    assert_eq!(completed["type"], json!("turn_completed"));
    assert_eq!(completed["message"], json!("Commit abc123: fix bug"));
    let modified = completed["modified_info"].as_array().expect("modified list");
    assert_eq!(modified.len(), 1);
    assert_eq!(
        modified[0]["diff_summary"],
        json!({"added": 0, "removed": 0})
    );

    let output = call(daemon.addr, "get_output_history", json!({"start_index": 0})).await;
    assert_eq!(
        output["result"],
        json!(["compiling", "Commit abc123: fix bug", "done"])
    );
}

#[tokio::test]
async fn unknown_method_and_garbage_frames() {
    let daemon = start().await;

    let response = call(daemon.addr, "bogus", Value::Null).await;
    assert_eq!(response["error"]["code"], json!(-32601));
    assert_eq!(response["result"], Value::Null);

    let mut conn = connect(daemon.addr).await;
    conn.send("{not json".to_string()).await.expect("send");
    let response = receive(&mut conn).await;
    assert_eq!(response["error"]["code"], json!(-32700));
}

#[tokio::test]
async fn dropped_subscriber_loses_nothing() {
    let daemon = start().await;

    let mut first = connect(daemon.addr).await;
    send(&mut first, 1, "notify", Value::Null).await;
    assert_eq!(receive(&mut first).await["result"]["type"], json!("agent_started"));

    // A second poll with nothing to deliver, abandoned by the client.
    send(&mut first, 2, "notify", Value::Null).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(first);
    tokio::time::sleep(Duration::from_millis(50)).await;

    daemon
        .state
        .session
        .notifications()
        .publish(Notification::AgentExited)
        .await;

    let mut second = connect(daemon.addr).await;
    send(&mut second, 1, "notify", Value::Null).await;
    assert_eq!(receive(&mut second).await["result"]["type"], json!("agent_exited"));
}

#[tokio::test]
async fn exit_stops_accepting() {
    let daemon = start().await;
    call(daemon.addr, "exit", Value::Null).await;

    assert!(daemon.state.shutdown.is_cancelled());
    tokio::time::timeout(Duration::from_secs(5), daemon.server)
        .await
        .expect("server stops")
        .expect("join");
}
