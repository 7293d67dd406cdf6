use std::sync::Arc;

use kiln::logs::{LogKind, LogMux};
use kiln::pubsub::PubSub;
use kiln::store::{JobStore, MemoryStore};
use uuid::Uuid;

fn mux(capacity: usize) -> (Arc<MemoryStore>, PubSub, LogMux) {
    let store = Arc::new(MemoryStore::new());
    let pubsub = PubSub::default();
    let mux = LogMux::new(store.clone(), pubsub.clone(), capacity);
    (store, pubsub, mux)
}

#[tokio::test]
async fn test_duplicate_chunks_stored_once() {
    let (store, pubsub, mux) = mux(64);
    let job_id = Uuid::new_v4();
    let mut rx = pubsub.subscribe_logs();

    for _ in 0..5 {
        mux.append(job_id, LogKind::Stdout, "LINE");
    }
    mux.flush(job_id).await;

    // Realtime subscribers see every chunk, repeats included.
    let mut realtime = 0;
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.data, "LINE");
        realtime += 1;
    }
    assert_eq!(realtime, 5);

    // Durable storage holds the content exactly once.
    let logs = store.get_job_logs(job_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, LogKind::Stdout);
    assert_eq!(logs[0].content, "LINE");
}

#[tokio::test]
async fn test_whitespace_only_chunks_dropped() {
    let (store, _pubsub, mux) = mux(64);
    let job_id = Uuid::new_v4();

    mux.append(job_id, LogKind::Stdout, "   ");
    mux.append(job_id, LogKind::Stdout, "\n\t");
    mux.append(job_id, LogKind::Stdout, "");
    mux.flush(job_id).await;

    assert!(store.get_job_logs(job_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_flush_consolidates_per_stream() {
    let (store, _pubsub, mux) = mux(64);
    let job_id = Uuid::new_v4();

    mux.append(job_id, LogKind::Stdout, "one");
    mux.append(job_id, LogKind::Stderr, "warn: something");
    mux.append(job_id, LogKind::Stdout, "two");
    mux.append(job_id, LogKind::Stdout, "three");
    mux.flush(job_id).await;

    let logs = store.get_job_logs(job_id).await.unwrap();
    assert_eq!(logs.len(), 2);

    let stdout = logs.iter().find(|l| l.kind == LogKind::Stdout).unwrap();
    assert_eq!(stdout.content, "one\ntwo\nthree");
    let stderr = logs.iter().find(|l| l.kind == LogKind::Stderr).unwrap();
    assert_eq!(stderr.content, "warn: something");
}

#[tokio::test]
async fn test_same_content_on_both_streams_kept_separately() {
    let (store, _pubsub, mux) = mux(64);
    let job_id = Uuid::new_v4();

    mux.append(job_id, LogKind::Stdout, "boom");
    mux.append(job_id, LogKind::Stderr, "boom");
    mux.flush(job_id).await;

    let logs = store.get_job_logs(job_id).await.unwrap();
    assert_eq!(logs.len(), 2);
}

#[tokio::test]
async fn test_accumulator_destroyed_on_flush() {
    let (store, _pubsub, mux) = mux(64);
    let job_id = Uuid::new_v4();

    mux.append(job_id, LogKind::Stdout, "line");
    assert!(mux.has_buffer(job_id));

    mux.flush(job_id).await;
    assert!(!mux.has_buffer(job_id));

    // A second flush is a no-op: no duplicate consolidated rows.
    mux.flush(job_id).await;
    assert_eq!(store.get_job_logs(job_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_overflow_drops_oldest_chunks() {
    let (store, _pubsub, mux) = mux(3);
    let job_id = Uuid::new_v4();

    for i in 0..5 {
        mux.append(job_id, LogKind::Stdout, &format!("chunk-{i}"));
    }
    mux.flush(job_id).await;

    let logs = store.get_job_logs(job_id).await.unwrap();
    assert_eq!(logs[0].content, "chunk-2\nchunk-3\nchunk-4");
}

#[tokio::test]
async fn test_streams_isolated_between_jobs() {
    let (store, _pubsub, mux) = mux(64);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    mux.append(a, LogKind::Stdout, "from-a");
    mux.append(b, LogKind::Stdout, "from-b");
    mux.flush(a).await;

    assert_eq!(store.get_job_logs(a).await.unwrap().len(), 1);
    assert!(store.get_job_logs(b).await.unwrap().is_empty());
    assert!(mux.has_buffer(b));
}
