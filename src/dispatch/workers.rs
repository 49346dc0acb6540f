//! Per-key serial workers.
//!
//! Each key (a WeChat conversation, or a Telegram chat on the outbound side)
//! owns one lightweight task with an unbounded FIFO queue; items for the
//! same key process strictly in arrival order while different keys run in
//! parallel. Idle workers are reaped by a periodic sweep.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Queue length above which a warning is logged (items still enqueue).
const SOFT_QUEUE_BOUND: usize = 1000;

/// Idle time after which a worker is eligible for reaping.
const IDLE_REAP_SECS: i64 = 600;

/// Sweep interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Reapings per sweep, to bound sweep work.
const MAX_REAPINGS_PER_SWEEP: usize = 10;

/// Drain budget on shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

/// Worker pool errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The worker's queue closed mid-dispatch (reap race); retryable.
    #[error("worker queue closed for key {0}")]
    QueueClosed(String),
}

type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The per-item handler. Invoked serially per key.
pub type WorkHandler<T> = Arc<dyn Fn(String, T) -> BoxedFuture + Send + Sync>;

struct Worker<T> {
    tx: mpsc::UnboundedSender<T>,
    queue_len: Arc<AtomicUsize>,
    last_activity: Arc<AtomicI64>,
    task: tokio::task::JoinHandle<()>,
}

/// Keyed pool of serial workers.
pub struct WorkerPool<T: Send + 'static> {
    workers: Mutex<HashMap<String, Worker<T>>>,
    handler: WorkHandler<T>,
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool dispatching items through `handler`.
    pub fn new(handler: WorkHandler<T>) -> Arc<Self> {
        Arc::new(Self {
            workers: Mutex::new(HashMap::new()),
            handler,
        })
    }

    /// Enqueue an item for `key`, lazily creating its worker.
    pub async fn dispatch(&self, key: &str, item: T) -> Result<(), DispatchError> {
        let mut workers = self.workers.lock().await;

        let needs_new = match workers.get(key) {
            Some(worker) => worker.tx.is_closed(),
            None => true,
        };
        if needs_new {
            let worker = self.spawn_worker(key.to_owned());
            workers.insert(key.to_owned(), worker);
            debug!(key, "worker created");
        }

        let worker = workers
            .get(key)
            .ok_or_else(|| DispatchError::QueueClosed(key.to_owned()))?;
        worker.last_activity.store(now_secs(), Ordering::Relaxed);
        let depth = worker.queue_len.fetch_add(1, Ordering::Relaxed) + 1;
        if depth > SOFT_QUEUE_BOUND {
            warn!(key, depth, "per-contact queue above soft bound");
        }
        worker
            .tx
            .send(item)
            .map_err(|_| DispatchError::QueueClosed(key.to_owned()))
    }

    fn spawn_worker(&self, key: String) -> Worker<T> {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        let queue_len = Arc::new(AtomicUsize::new(0));
        let last_activity = Arc::new(AtomicI64::new(now_secs()));
        let handler = Arc::clone(&self.handler);

        let queue_len_task = Arc::clone(&queue_len);
        let last_activity_task = Arc::clone(&last_activity);
        let worker_key = key.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                handler(worker_key.clone(), item).await;
                queue_len_task.fetch_sub(1, Ordering::Relaxed);
                last_activity_task.store(now_secs(), Ordering::Relaxed);
            }
        });

        Worker {
            tx,
            queue_len,
            last_activity,
            task,
        }
    }

    /// Run the idle sweeper until `shutdown` flips.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => self.sweep_idle().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Reap workers idle past the threshold with an empty queue; capped per
    /// sweep.
    pub async fn sweep_idle(&self) {
        let cutoff = now_secs() - IDLE_REAP_SECS;
        let mut workers = self.workers.lock().await;

        let idle: Vec<String> = workers
            .iter()
            .filter(|(_, w)| {
                w.queue_len.load(Ordering::Relaxed) == 0
                    && w.last_activity.load(Ordering::Relaxed) < cutoff
            })
            .map(|(k, _)| k.clone())
            .take(MAX_REAPINGS_PER_SWEEP)
            .collect();

        for key in idle {
            if let Some(worker) = workers.remove(&key) {
                drop(worker.tx); // closes the queue; the task drains and exits
                debug!(key, "idle worker reaped");
            }
        }
    }

    /// Drain queues within a fixed budget, then cancel whatever remains.
    pub async fn shutdown(&self) {
        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN;
        let mut workers = self.workers.lock().await;

        for (key, worker) in workers.drain() {
            // Closing the queue lets the worker run dry.
            drop(worker.tx);
            let mut task = worker.task;
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut task).await.is_err() {
                warn!(key, "worker did not drain in time, cancelled");
                task.abort();
            }
        }
    }

    /// Live worker count (tests and diagnostics).
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }
}

// ── Tests ───────────────────────────────────────────────────────
