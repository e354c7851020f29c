//! End-to-end tests driving the engine through its public surface.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strata_engine::{
    BackendKind, DatabaseBackend, EngineBuilder, FileBackend, Priority, StorageConfig,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("strata_engine=debug")
        .try_init();
}

#[tokio::test(start_paused = true)]
async fn low_priority_writes_coalesce_after_the_quiet_window() {
    init_logging();
    let engine = EngineBuilder::new().memory().build().unwrap();

    // Arrivals 100ms apart keep resetting the 500ms low-priority window.
    let mut pendings = Vec::new();
    for i in 0..5 {
        pendings.push(
            engine
                .set(BackendKind::Memory, &format!("k{i}"), json!(i), Priority::Low)
                .unwrap(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.stats().total_batches, 0, "debounce fired early");
    }

    // Quiet period long enough for the window to elapse.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let stats = engine.stats();
    assert_eq!(stats.total_batches, 1);
    assert_eq!(stats.batched_operations, 5);
    assert_eq!(stats.queue_length, 0);

    for pending in pendings {
        assert!(pending.wait().await.unwrap().succeeded);
    }
}

#[tokio::test(start_paused = true)]
async fn priorities_debounce_independently() {
    let engine = EngineBuilder::new().memory().build().unwrap();

    let high = engine
        .set(BackendKind::Memory, "h", json!(1), Priority::High)
        .unwrap();
    let low = engine
        .set(BackendKind::Memory, "l", json!(2), Priority::Low)
        .unwrap();

    // The 50ms high window elapses long before the 500ms low window.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.stats().total_batches, 1);
    assert!(high.wait().await.unwrap().succeeded);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(engine.stats().total_batches, 2);
    assert!(low.wait().await.unwrap().succeeded);
}

#[tokio::test(start_paused = true)]
async fn critical_writes_never_wait() {
    let engine = EngineBuilder::new().memory().build().unwrap();
    let outcome = engine
        .set(BackendKind::Memory, "urgent", json!("now"), Priority::Critical)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(outcome.succeeded);
    assert_eq!(engine.stats().total_batches, 1);
}

#[tokio::test(start_paused = true)]
async fn backpressure_reports_queue_sizes() {
    let config = StorageConfig {
        max_queue_size: 3,
        max_batch_size: 3,
        ..Default::default()
    };
    let engine = EngineBuilder::new().memory().config(config).build().unwrap();

    for i in 0..3 {
        engine
            .set(BackendKind::Memory, &format!("k{i}"), json!(i), Priority::Low)
            .unwrap();
    }
    let err = engine
        .set(BackendKind::Memory, "overflow", json!(0), Priority::Low)
        .err()
        .expect("enqueue succeeded past capacity");
    match err {
        strata_engine::Error::QueueFull { current, max } => {
            assert_eq!(current, 3);
            assert_eq!(max, 3);
        }
        other => panic!("expected QueueFull, got {other:?}"),
    }
}

#[tokio::test]
async fn file_backend_round_trips_compressed_values() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FileBackend::new(dir.path()).await.unwrap());

    let engine = EngineBuilder::new()
        .backend(BackendKind::File, backend.clone())
        .build()
        .unwrap();

    // ~10KB of repetitive JSON crosses the compression threshold.
    let value = json!({"rows": vec!["the quick brown fox jumps over the lazy dog"; 250]});
    engine
        .set(BackendKind::File, "big", value.clone(), Priority::Critical)
        .unwrap()
        .wait()
        .await
        .unwrap();

    // A second engine over the same directory sees only the stored bytes,
    // so the read exercises the full decode path.
    let reader = EngineBuilder::new()
        .backend(BackendKind::File, backend)
        .build()
        .unwrap();
    assert_eq!(
        reader.get(BackendKind::File, "big").await.unwrap(),
        Some(value)
    );
}

#[tokio::test]
async fn database_backend_serves_engine_reads() {
    let backend = Arc::new(DatabaseBackend::in_memory().await.unwrap());
    let engine = EngineBuilder::new()
        .backend(BackendKind::Database, backend)
        .build()
        .unwrap();

    engine
        .set(
            BackendKind::Database,
            "account:7",
            json!({"balance": 1250}),
            Priority::Critical,
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(engine.exists(BackendKind::Database, "account:7").await.unwrap());
    assert_eq!(
        engine.get(BackendKind::Database, "account:7").await.unwrap(),
        Some(json!({"balance": 1250}))
    );

    engine
        .delete(BackendKind::Database, "account:7", Priority::Critical)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(
        engine.get(BackendKind::Database, "account:7").await.unwrap(),
        None
    );
}

#[tokio::test(start_paused = true)]
async fn cache_serves_repeat_reads_without_the_backend() {
    let engine = EngineBuilder::new().memory().build().unwrap();
    engine
        .set(BackendKind::Memory, "hot", json!("value"), Priority::Critical)
        .unwrap()
        .wait()
        .await
        .unwrap();

    for _ in 0..10 {
        assert!(engine.get(BackendKind::Memory, "hot").await.unwrap().is_some());
    }
    let stats = engine.stats();
    assert_eq!(stats.cache_hits, 10);
    assert_eq!(stats.cache_misses, 0);

    let l1 = &engine.cache_stats()[0];
    assert_eq!(l1.entries, 1);
    assert!(l1.hit_rate > 0.9);
}

#[tokio::test]
async fn health_check_reports_an_unreachable_backend() {
    // Port 1 on loopback refuses connections, so the remote probe fails
    // while the memory backend stays healthy.
    let engine = EngineBuilder::new()
        .memory()
        .backend(
            BackendKind::Remote,
            Arc::new(strata_engine::RemoteBackend::new("http://127.0.0.1:1").unwrap()),
        )
        .build()
        .unwrap();

    let report = engine.health_check().await;
    assert!(!report.healthy());
    assert!(report.backends[&BackendKind::Memory].available);
    assert!(!report.backends[&BackendKind::Remote].available);
    assert!(report.cache_available);
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_queued_writes() {
    init_logging();
    let engine = EngineBuilder::new().memory().build().unwrap();
    engine.start();

    let mut pendings = Vec::new();
    for i in 0..10 {
        pendings.push(
            engine
                .set(BackendKind::Memory, &format!("k{i}"), json!(i), Priority::Low)
                .unwrap(),
        );
    }
    engine.shutdown().await;

    for pending in pendings {
        assert!(pending.wait().await.unwrap().succeeded);
    }
    assert_eq!(engine.stats().queue_length, 0);
    assert!(engine
        .set(BackendKind::Memory, "late", json!(1), Priority::Low)
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn stats_reset_preserves_liveness() {
    let engine = EngineBuilder::new().memory().build().unwrap();
    engine
        .set(BackendKind::Memory, "k", json!(1), Priority::Critical)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(engine.stats().total_operations > 0);

    engine.reset_stats();
    assert_eq!(engine.stats().total_operations, 0);

    // The engine keeps working after a reset.
    engine
        .set(BackendKind::Memory, "k2", json!(2), Priority::Critical)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(engine.get(BackendKind::Memory, "k2").await.unwrap(), Some(json!(2)));
}
