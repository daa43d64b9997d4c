use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;
use vtt_host::{ControlClient, Daemon, HostConfig, RequestEnvelope, SessionRegistry, StreamEvent};
use vtt_store::MemStore;
use vtt_types::Version;

async fn wait_for_socket(path: &Path) {
    for _ in 0..50 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("control socket never appeared at {}", path.display());
}

/// Create, subscribe, update, fetch, end, and shut down over the Unix socket.
#[tokio::test]
async fn control_channel_round_trip() {
    let registry = Arc::new(SessionRegistry::new(
        HostConfig {
            sync_interval: Duration::from_secs(3600),
            ..HostConfig::default()
        },
        Arc::new(MemStore::new()),
    ));
    let sock_dir = TempDir::new().unwrap();
    let sock_path = sock_dir.path().join("control.sock");
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut daemon = Daemon::new(Arc::clone(&registry), sock_path.clone(), shutdown_tx);
    let daemon_handle = tokio::spawn(async move { daemon.run().await });
    wait_for_socket(&sock_path).await;

    let mut client = ControlClient::connect(&sock_path).await.unwrap();
    let created = client
        .call(
            "session-create",
            json!({
                "sessionId": "s1",
                "writer": "gm",
                "participants": ["p1"],
                "initialState": {"actors": {"a1": {"hp": 10}}}
            }),
        )
        .await
        .unwrap();
    assert_eq!(created["status"], json!("CREATED"));
    assert_eq!(created["version"], json!("0"));

    let connected = client
        .call("writer-connect", json!({"sessionId": "s1", "writer": "gm"}))
        .await
        .unwrap();
    assert_eq!(connected["status"], json!("ACTIVE"));

    // Second connection becomes a broadcast stream.
    let mut watcher = ControlClient::connect(&sock_path).await.unwrap();
    let first = watcher
        .request(&RequestEnvelope {
            v: 1,
            id: "sub-1".into(),
            cmd: "subscribe".into(),
            payload: json!({"sessionId": "s1", "participant": "p1"}),
        })
        .await
        .unwrap();
    assert!(first.ok, "{first:?}");
    assert_eq!(first.id, "sub-1");
    let event: StreamEvent = serde_json::from_value(first.result.unwrap()).unwrap();
    let snapshot = match event {
        StreamEvent::Snapshot { snapshot, .. } => snapshot,
        other => panic!("expected snapshot, got {other:?}"),
    };
    assert_eq!(snapshot.version, Version::ZERO);

    let resp = client
        .call(
            "state-update",
            json!({
                "submitter": "gm",
                "update": {
                    "requestId": "r1",
                    "sessionId": "s1",
                    "baseVersion": "0",
                    "operations": [
                        {"path": ["actors", "a1", "hp"], "verb": "inc", "value": -3}
                    ]
                }
            }),
        )
        .await
        .unwrap();
    assert_eq!(resp["success"], json!(true));
    assert_eq!(resp["newVersion"], json!("1"));

    match watcher.next_event().await.unwrap() {
        Some(StreamEvent::Broadcast(msg)) => {
            assert_eq!(msg.new_version, Version::new(1));
            assert_eq!(json!(msg.new_hash), resp["newHash"]);
        }
        other => panic!("expected broadcast, got {other:?}"),
    }

    let stale = client
        .call(
            "state-update",
            json!({
                "submitter": "gm",
                "update": {
                    "requestId": "r2",
                    "sessionId": "s1",
                    "baseVersion": "0",
                    "operations": [{"path": ["round"], "verb": "set", "value": 2}]
                }
            }),
        )
        .await
        .unwrap();
    assert_eq!(stale["success"], json!(false));
    assert_eq!(stale["error"]["code"], json!("VERSION_CONFLICT"));
    assert_eq!(stale["error"]["currentVersion"], json!("1"));

    let unchanged = client
        .call(
            "full-state",
            json!({
                "requester": "p1",
                "request": {"sessionId": "s1", "cachedVersion": "1", "cachedHash": resp["newHash"]}
            }),
        )
        .await
        .unwrap();
    assert_eq!(unchanged, json!({"unchanged": true}));

    let full = client
        .call("full-state", json!({"requester": "p1", "request": {"sessionId": "s1"}}))
        .await
        .unwrap();
    assert_eq!(full["state"]["actors"]["a1"]["hp"], json!(7));

    let unknown = client
        .request(&RequestEnvelope {
            v: 1,
            id: "x".into(),
            cmd: "no-such-thing".into(),
            payload: json!({}),
        })
        .await
        .unwrap();
    assert!(!unknown.ok);
    assert_eq!(unknown.error.unwrap().code, "unknown_method");

    let listed = client.call("session-list", json!({})).await.unwrap();
    assert_eq!(listed["sessions"][0]["sessionId"], json!("s1"));

    let ended = client
        .call("session-end", json!({"sessionId": "s1"}))
        .await
        .unwrap();
    assert_eq!(ended["persisted"], json!(true));
    assert_eq!(ended["version"], json!("1"));

    match watcher.next_event().await.unwrap() {
        Some(StreamEvent::Closed { reason }) => assert_eq!(reason, "ended"),
        other => panic!("expected close, got {other:?}"),
    }

    let gone = client
        .call("full-state", json!({"requester": "p1", "request": {"sessionId": "s1"}}))
        .await
        .unwrap_err();
    assert!(gone.to_string().contains("SESSION_NOT_FOUND"), "{gone}");

    client.call("shutdown", json!({})).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), daemon_handle)
        .await
        .expect("daemon stops")
        .unwrap()
        .unwrap();
    assert!(!sock_path.exists());
}

#[tokio::test]
async fn malformed_operations_are_rejected_in_the_update_response() {
    let registry = Arc::new(SessionRegistry::new(
        HostConfig {
            sync_interval: Duration::from_secs(3600),
            ..HostConfig::default()
        },
        Arc::new(MemStore::new()),
    ));
    let sock_dir = TempDir::new().unwrap();
    let sock_path = sock_dir.path().join("control.sock");
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut daemon = Daemon::new(Arc::clone(&registry), sock_path.clone(), shutdown_tx);
    let daemon_handle = tokio::spawn(async move { daemon.run().await });
    wait_for_socket(&sock_path).await;

    let mut client = ControlClient::connect(&sock_path).await.unwrap();
    client
        .call("session-create", json!({"sessionId": "s1", "writer": "gm"}))
        .await
        .unwrap();
    client
        .call("writer-connect", json!({"sessionId": "s1", "writer": "gm"}))
        .await
        .unwrap();

    let bad_ops = [
        json!({"path": ["round"], "verb": "rename", "value": 1}),
        json!({"path": ["tokens", -1], "verb": "set", "value": 1}),
    ];
    for op in bad_ops {
        let resp = client
            .call(
                "state-update",
                json!({
                    "submitter": "gm",
                    "update": {
                        "requestId": "r1",
                        "sessionId": "s1",
                        "baseVersion": "0",
                        "operations": [{"path": ["round"], "verb": "set", "value": 1}, op]
                    }
                }),
            )
            .await
            .unwrap();
        assert_eq!(resp["success"], json!(false), "{resp}");
        assert_eq!(resp["error"]["code"], json!("VALIDATION_ERROR"));
    }
    assert_eq!(registry.list()[0].version, Version::ZERO);

    // A broken update envelope is still a request error.
    let broken = client
        .request(&RequestEnvelope {
            v: 1,
            id: "r2".into(),
            cmd: "state-update".into(),
            payload: json!({"submitter": "gm", "update": {"sessionId": "s1", "operations": []}}),
        })
        .await
        .unwrap();
    assert!(!broken.ok);
    assert_eq!(broken.error.unwrap().code, "decode_error");

    client.call("shutdown", json!({})).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), daemon_handle)
        .await
        .expect("daemon stops")
        .unwrap()
        .unwrap();
}
