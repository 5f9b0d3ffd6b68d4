use std::sync::Arc;
use std::time::{Duration, Instant};

use driverlink::daemon::{DriverMeta, DriverSpec, Relayed, Supervisor};
use driverlink::driver::command_message;
use driverlink::error::{RpcError, SupervisorError};
use driverlink::protocol::{DriverState, Message, Payload};
use tokio::sync::mpsc;
use serde_json::json;

const DRIVER: &str = env!("CARGO_BIN_EXE_echo-driver");

async fn wait_for<F>(supervisor: &Supervisor, mut done: F) -> Vec<Relayed>
where
    F: FnMut(&[Relayed]) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        seen.extend(supervisor.poll().await);
        if done(&seen) {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("driver did not answer in time, got {seen:?}");
}

fn has(seen: &[Relayed], channel: &str, subject: &str) -> bool {
    seen.iter()
        .any(|r| r.message.channel == channel && r.message.subject == subject)
}

#[tokio::test]
async fn handshake_rpc_and_stop() {
    let supervisor = Supervisor::new();
    let spec = DriverSpec::new(DRIVER)
        .args(["extra-arg"])
        .env("DRIVERLINK_LOG_FD", "off")
        .env("DRIVERLINK_LOG", "debug");
    let data = json!({"data": {"loglevel": "DEBUG"}});

    let info = supervisor
        .start("engine", DriverMeta::new("echo"), spec, data)
        .await
        .unwrap();
    assert!(info.running);
    assert!(info.pid.is_some());

    // options + start from the supervisor end in an `alive` state report
    let seen = wait_for(&supervisor, |seen| has(seen, "state", "alive")).await;
    assert!(seen.iter().all(|r| r.service == "engine" && r.driver == "echo"));
    assert_eq!(
        supervisor.get("engine").await.unwrap().state,
        Some(DriverState::Alive)
    );

    supervisor
        .send("engine", &Message::raw("rpc", "echo.1.console", b"ping-pong".to_vec()))
        .await
        .unwrap();
    supervisor
        .send("engine", &Message::signal("rpc", "fail.2.console"))
        .await
        .unwrap();
    let seen = wait_for(&supervisor, |seen| {
        has(seen, "rpcReply", "console.1") && has(seen, "rpcReply", "console.2.err")
    })
    .await;
    let echoed = seen
        .iter()
        .find(|r| r.message.subject == "console.1")
        .unwrap();
    assert_eq!(echoed.message.payload_bytes().unwrap(), b"ping-pong");
    let failed = seen
        .iter()
        .find(|r| r.message.subject == "console.2.err")
        .unwrap();
    assert_eq!(
        failed.message.structured_value().unwrap(),
        json!({"reason": "fail always fails"})
    );

    supervisor
        .send(
            "engine",
            &command_message("3", "daemon", "echo", json!({"hello": "world"})).unwrap(),
        )
        .await
        .unwrap();
    let seen = wait_for(&supervisor, |seen| has(seen, "eventbus", "daemon.3")).await;
    let reply = seen
        .iter()
        .find(|r| r.message.subject == "daemon.3")
        .unwrap();
    assert_eq!(
        reply.message.structured_value().unwrap(),
        json!({"hello": "world"})
    );

    let stopped = supervisor
        .stop("engine", Duration::from_secs(10))
        .await
        .unwrap();
    assert!(stopped.status.success(), "exit status {}", stopped.status);
    assert!(stopped
        .messages
        .iter()
        .any(|m| m.channel == "state" && m.subject == "exit"));
    assert!(supervisor.list().await.is_empty());
}

#[tokio::test]
async fn daemon_calls_are_matched_by_id() {
    let supervisor = Arc::new(Supervisor::new());
    let spec = DriverSpec::new(DRIVER).env("DRIVERLINK_LOG_FD", "off");
    supervisor
        .start("engine", DriverMeta::new("echo"), spec, json!({"data": {}}))
        .await
        .unwrap();
    wait_for(&supervisor, |seen| has(seen, "state", "alive")).await;

    let (bus, mut output) = mpsc::channel(256);
    let relay = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.relay(bus, Duration::from_millis(10)).await })
    };
    let drain = tokio::spawn(async move {
        let mut rest = Vec::new();
        while let Some(relayed) = output.recv().await {
            rest.push(relayed);
        }
        rest
    });

    // the slow call goes out first, its reply comes back last
    let begin = Instant::now();
    let slow = async {
        let reply = supervisor
            .call("engine", "delay", Payload::Raw(b"400".to_vec()))
            .await;
        (reply, begin.elapsed())
    };
    let fast = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let reply = supervisor
            .call("engine", "delay", Payload::Raw(b"0".to_vec()))
            .await;
        (reply, begin.elapsed())
    };
    let ((slow, slow_at), (fast, fast_at)) = tokio::join!(slow, fast);

    assert_eq!(slow.unwrap(), Payload::Raw(b"400".to_vec()));
    assert_eq!(fast.unwrap(), Payload::Raw(b"0".to_vec()));
    assert!(fast_at < slow_at, "fast {fast_at:?}, slow {slow_at:?}");
    assert_eq!(supervisor.pending_calls(), 0);

    let failed = supervisor
        .call_timeout("engine", "fail", Payload::Empty, Duration::from_secs(10))
        .await
        .unwrap_err();
    match failed {
        SupervisorError::Rpc {
            source: RpcError::Remote { reason },
            ..
        } => assert_eq!(reason, "fail always fails"),
        other => panic!("expected remote error, got {other:?}"),
    }

    relay.abort();
    let _ = relay.await;
    let rest = drain.await.unwrap();
    // resolved replies are not relayed
    assert!(rest.iter().all(|r| r.message.channel != "rpcReply"));

    supervisor
        .stop("engine", Duration::from_secs(10))
        .await
        .unwrap();
}
