//! Integration tests over a real WebSocket server.
//!
//! Each test starts a `CollectionServer` on a free port and talks to it
//! through `RemoteBackend`.

use std::sync::Arc;

use folio_core::{SnapshotSource, Skill};
use folio_sync::{
    BackendEvent, CollectionBackend, CollectionServer, Direction, ErrorCode, MemoryBackend,
    OnlineSignal, Query, RemoteBackend, ResilientCollectionSync, RetryPolicy, ServerConfig,
    SyncConfig, SyncOptions, SyncState, WriteOp,
};
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio::time::{timeout, Duration};

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server over `backend`, return its URL.
async fn start_test_server(backend: Arc<MemoryBackend>) -> String {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..ServerConfig::default()
    };
    let server = CollectionServer::new(config, backend);
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("ws://127.0.0.1:{port}")
}

fn seeded_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .set("skills", "rust", fields(json!({"name": "Rust", "category": "Languages", "level": 90})))
        .unwrap();
    backend
        .set("skills", "go", fields(json!({"name": "Go", "category": "Languages", "level": 70})))
        .unwrap();
    backend
}

async fn next_event(listener: &mut folio_sync::Listener) -> BackendEvent {
    timeout(Duration::from_secs(2), listener.next())
        .await
        .expect("event within timeout")
        .expect("listener still open")
}

#[tokio::test]
async fn test_remote_listener_receives_initial_snapshot() {
    let url = start_test_server(seeded_backend()).await;
    let remote = RemoteBackend::new(url);

    let mut listener = remote.subscribe("skills", None).unwrap();
    match next_event(&mut listener).await {
        BackendEvent::Snapshot(records) => {
            let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(ids, vec!["rust", "go"]);
            assert_eq!(records[0].fields["level"], 90);
        }
        other => panic!("Expected snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_query_is_applied_server_side() {
    let url = start_test_server(seeded_backend()).await;
    let remote = RemoteBackend::new(url);

    let query = Query::new().order_by("level", Direction::Asc).limit(1);
    let mut listener = remote.subscribe("skills", Some(&query)).unwrap();
    match next_event(&mut listener).await {
        BackendEvent::Snapshot(records) => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].id, "go");
        }
        other => panic!("Expected snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_write_reaches_listeners() {
    let backend = seeded_backend();
    let url = start_test_server(backend.clone()).await;
    let remote = RemoteBackend::new(url);

    let mut listener = remote.subscribe("skills", None).unwrap();
    next_event(&mut listener).await;

    let id = remote
        .write(WriteOp::Set {
            collection: "skills".into(),
            id: "sql".into(),
            fields: fields(json!({"name": "SQL", "category": "Data", "level": 60})),
        })
        .await
        .unwrap();
    assert_eq!(id, "sql");
    assert!(backend.get("skills", "sql").is_some());

    match next_event(&mut listener).await {
        BackendEvent::Snapshot(records) => assert_eq!(records.len(), 3),
        other => panic!("Expected snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_write_error_is_returned() {
    let url = start_test_server(seeded_backend()).await;
    let remote = RemoteBackend::new(url);

    let err = remote
        .write(WriteOp::Update {
            collection: "skills".into(),
            id: "missing".into(),
            fields: Map::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn test_remote_fault_is_forwarded() {
    let backend = seeded_backend();
    backend.set_fault("skills", folio_sync::BackendError::permission_denied("denied"));
    let url = start_test_server(backend).await;
    let remote = RemoteBackend::new(url);

    let mut listener = remote.subscribe("skills", None).unwrap();
    match next_event(&mut listener).await {
        BackendEvent::Error(e) => {
            assert_eq!(e.code, ErrorCode::PermissionDenied);
            assert!(!e.is_transient());
        }
        other => panic!("Expected error, got {other:?}"),
    }
    assert!(listener.next().await.is_none());
}

#[tokio::test]
async fn test_server_stats_track_activity() {
    let backend = seeded_backend();
    let port = free_port().await;
    let server = Arc::new(CollectionServer::with_backend(format!("127.0.0.1:{port}"), backend));
    let running = server.clone();
    tokio::spawn(async move {
        running.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let remote = RemoteBackend::new(format!("ws://127.0.0.1:{port}"));
    let mut listener = remote.subscribe("skills", None).unwrap();
    next_event(&mut listener).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = server.stats().await;
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.active_connections, 1);
    assert_eq!(stats.total_subscriptions, 1);
}

#[tokio::test]
async fn test_sync_goes_live_over_websocket() {
    let backend = seeded_backend();
    let url = start_test_server(backend.clone()).await;

    let sync = ResilientCollectionSync::start(
        Arc::new(RemoteBackend::new(url)),
        OnlineSignal::online(),
        SyncConfig::default(),
        SyncOptions::<Skill>::for_entity(),
    );
    let mut rx = sync.subscribe();

    let view = timeout(Duration::from_secs(2), rx.wait_for(|v| v.state == SyncState::Live))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(view.source, SnapshotSource::Live);
    assert_eq!(view.data.len(), 2);
    assert_eq!(view.data[0].data.name, "Rust");

    backend.delete("skills", "go").unwrap();
    let view = timeout(Duration::from_secs(2), rx.wait_for(|v| v.data.len() == 1))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(view.data[0].id, "rust");
}

#[tokio::test]
async fn test_unreachable_server_degrades_after_retries() {
    let port = free_port().await;
    let config = SyncConfig {
        backend_enabled: true,
        retry: RetryPolicy {
            base_delay_ms: 10,
            max_retries: 2,
        },
    };
    let fallback = vec![Skill {
        name: "Rust".into(),
        category: "Languages".into(),
        level: 90,
    }];

    let sync = ResilientCollectionSync::start(
        Arc::new(RemoteBackend::new(format!("ws://127.0.0.1:{port}"))),
        OnlineSignal::online(),
        config,
        SyncOptions::for_entity().fallback(fallback),
    );
    let mut rx = sync.subscribe();

    let view = timeout(Duration::from_secs(5), rx.wait_for(|v| v.state == SyncState::Degraded))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(view.source, SnapshotSource::Fallback);
    assert_eq!(view.data[0].id, "fallback-skill-0");
    assert!(view.error.unwrap().contains("after 2 retries"));
}
