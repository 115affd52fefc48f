//! Fixed-size worker pool for relaychat sends.
//!
//! Callers on the game-logic thread hand a send task to the pool and get a
//! [`TaskHandle`] back immediately; one of a fixed number of workers runs
//! the task later. The queue in front of the workers is unbounded, since
//! the expected bottleneck is the transport, not the pool; its depth is
//! tracked and a warning is logged when it grows past a threshold.
//!
//! A task that panics is logged and its handle resolves with
//! [`PoolError::Panicked`]. Nothing a task does reaches the submitting
//! thread any other way.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers. Fixed for the life of the pool.
    pub workers: usize,
    /// Queue depth at which a warning is logged (and again at every
    /// multiple of it).
    pub queue_warn_depth: usize,
    /// Name used in log lines.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_warn_depth: 256,
            name: "relay-send".to_string(),
        }
    }
}

impl PoolConfig {
    pub const MAX_WORKERS: usize = 256;

    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`WorkerPool::new`].
    pub fn validated(mut self) -> Self {
        if self.workers == 0 {
            tracing::warn!("worker count of 0 is unusable, using 1");
            self.workers = 1;
        }
        if self.workers > Self::MAX_WORKERS {
            tracing::warn!(
                workers = self.workers,
                max = Self::MAX_WORKERS,
                "worker count exceeds maximum, clamping"
            );
            self.workers = Self::MAX_WORKERS;
        }
        self.queue_warn_depth = self.queue_warn_depth.max(1);
        self
    }
}

// ---------------------------------------------------------------------------
// Errors and handles
// ---------------------------------------------------------------------------

/// Why a [`TaskHandle`] resolved without a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The task panicked while running.
    #[error("pool task panicked")]
    Panicked,
    /// The task was dropped before it ran (runtime shutting down).
    #[error("pool task was dropped before completion")]
    Dropped,
}

/// Handle to a submitted task. Resolves once the task has run.
///
/// Dropping the handle does not cancel the task.
#[must_use = "dropping the handle detaches the task; it still runs"]
pub struct TaskHandle<T> {
    state: HandleState<T>,
}

enum HandleState<T> {
    Ready(Option<T>),
    Pending(oneshot::Receiver<Result<T, PoolError>>),
}

// `T` is only ever moved out of the `Option`, never pinned.
impl<T> Unpin for TaskHandle<T> {}

impl<T> TaskHandle<T> {
    /// A handle that is already resolved with `value`. No work is queued.
    pub fn ready(value: T) -> Self {
        Self {
            state: HandleState::Ready(Some(value)),
        }
    }

    /// Whether the handle resolved without queueing anything.
    pub fn is_immediate(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, PoolError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            // A second poll after completion finds nothing left to hand out.
            HandleState::Ready(value) => Poll::Ready(value.take().ok_or(PoolError::Dropped)),
            HandleState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or(Err(PoolError::Dropped))),
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

type Job = BoxFuture<'static, ()>;

/// A fixed set of workers draining one unbounded queue.
///
/// Must be created inside a Tokio runtime. Dropping the pool closes the
/// queue; workers finish what is already queued and exit.
pub struct WorkerPool {
    queue: mpsc::UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let config = config.validated();
        let (queue, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let depth = Arc::new(AtomicUsize::new(0));

        let workers = (0..config.workers)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    config.name.clone(),
                    Arc::clone(&rx),
                    Arc::clone(&depth),
                ))
            })
            .collect();

        tracing::info!(pool = %config.name, workers = config.workers, "worker pool started");
        Self {
            queue,
            depth,
            workers,
            config,
        }
    }

    /// Queues `task` and returns a handle to its result immediately.
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let pool = self.config.name.clone();
        let job: Job = Box::pin(async move {
            let result = AssertUnwindSafe(task).catch_unwind().await;
            let result = result.map_err(|_| {
                tracing::error!(%pool, "pool task panicked");
                PoolError::Panicked
            });
            let _ = tx.send(result);
        });

        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth % self.config.queue_warn_depth == 0 {
            tracing::warn!(
                pool = %self.config.name,
                depth,
                workers = self.config.workers,
                "send queue is backing up"
            );
        }

        if self.queue.send(job).is_err() {
            // Workers are gone; the job (and its sender) was dropped.
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        TaskHandle {
            state: HandleState::Pending(rx),
        }
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Closes the queue, lets workers finish everything already queued,
    /// and waits for them to exit.
    pub async fn shutdown(self) {
        let Self {
            queue,
            workers,
            config,
            ..
        } = self;
        drop(queue);
        for worker in workers {
            let _ = worker.await;
        }
        tracing::info!(pool = %config.name, "worker pool stopped");
    }
}

async fn worker_loop(
    index: usize,
    pool: String,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    depth: Arc<AtomicUsize>,
) {
    tracing::trace!(%pool, worker = index, "worker started");
    loop {
        // Hold the receiver lock only while waiting for the next job.
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        depth.fetch_sub(1, Ordering::SeqCst);
        job.await;
    }
    tracing::trace!(%pool, worker = index, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.queue_warn_depth, 256);
    }

    #[test]
    fn test_validated_clamps_workers() {
        assert_eq!(PoolConfig::with_workers(0).validated().workers, 1);
        assert_eq!(
            PoolConfig::with_workers(10_000).validated().workers,
            PoolConfig::MAX_WORKERS
        );
        assert_eq!(PoolConfig::with_workers(4).validated().workers, 4);
    }

    #[test]
    fn test_validated_raises_zero_warn_depth() {
        let cfg = PoolConfig {
            queue_warn_depth: 0,
            ..PoolConfig::default()
        };
        assert_eq!(cfg.validated().queue_warn_depth, 1);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let cfg: PoolConfig = serde_json::from_str(r#"{"workers": 2}"#).unwrap();
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.name, "relay-send");
    }

    #[tokio::test]
    async fn test_ready_handle_resolves_without_pool() {
        let handle = TaskHandle::ready(false);
        assert!(handle.is_immediate());
        assert_eq!(handle.await, Ok(false));
    }
}
