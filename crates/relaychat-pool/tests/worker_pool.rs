use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use relaychat_pool::{PoolConfig, PoolError, WorkerPool};
use tokio::sync::{Notify, oneshot};

fn pool(workers: usize) -> WorkerPool {
    WorkerPool::new(PoolConfig::with_workers(workers))
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_submit_returns_task_result() {
    let pool = pool(2);
    let handle = pool.submit(async { 21 * 2 });
    assert!(!handle.is_immediate());
    assert_eq!(handle.await, Ok(42));
}

#[tokio::test]
async fn test_submit_does_not_wait_for_task() {
    let pool = pool(1);
    let (release_tx, release_rx) = oneshot::channel::<()>();

    // Returns while the task is still blocked.
    let handle = pool.submit(async move {
        let _ = release_rx.await;
        "done"
    });

    release_tx.send(()).unwrap();
    assert_eq!(handle.await, Ok("done"));
}

#[tokio::test]
async fn test_dropped_handle_still_runs_task() {
    let pool = pool(1);
    let ran = Arc::new(Notify::new());
    let signal = Arc::clone(&ran);

    drop(pool.submit(async move { signal.notify_one() }));

    tokio::time::timeout(Duration::from_secs(5), ran.notified())
        .await
        .expect("task should run without its handle");
}

#[tokio::test]
async fn test_tasks_run_concurrently_up_to_worker_count() {
    let pool = pool(4);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let gate = Arc::clone(&gate);
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                gate.notified().await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    // Wait until every worker is parked on the gate.
    while running.load(Ordering::SeqCst) < 4 {
        tokio::task::yield_now().await;
    }
    gate.notify_waiters();
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_queued_counts_waiting_tasks() {
    let pool = pool(1);
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let (started_tx, started_rx) = oneshot::channel::<()>();

    let blocker = pool.submit(async move {
        let _ = started_tx.send(());
        let _ = release_rx.await;
    });
    started_rx.await.unwrap();

    let waiting: Vec<_> = (0..3).map(|i| pool.submit(async move { i })).collect();
    assert_eq!(pool.queued(), 3);

    release_tx.send(()).unwrap();
    blocker.await.unwrap();
    for (i, handle) in waiting.into_iter().enumerate() {
        assert_eq!(handle.await, Ok(i));
    }
    assert_eq!(pool.queued(), 0);
}

// ---------------------------------------------------------------------------
// Failure isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_panicking_task_resolves_with_error() {
    let pool = pool(1);
    let handle = pool.submit::<_, ()>(async { panic!("boom") });
    assert_eq!(handle.await, Err(PoolError::Panicked));
}

#[tokio::test]
async fn test_worker_survives_panicking_task() {
    let pool = pool(1);
    let _ = pool.submit::<_, ()>(async { panic!("boom") }).await;
    assert_eq!(pool.submit(async { 7 }).await, Ok(7));
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_drains_queued_tasks() {
    let pool = pool(2);
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..20 {
        let counter = Arc::clone(&counter);
        let _ = pool.submit(async move {
            tokio::task::yield_now().await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    pool.shutdown().await;
    assert_eq!(counter.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn test_worker_count_matches_config() {
    let pool = pool(3);
    assert_eq!(pool.worker_count(), 3);
    assert_eq!(WorkerPool::new(PoolConfig::default()).worker_count(), 8);
}
