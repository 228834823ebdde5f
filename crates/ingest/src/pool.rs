//! Bounded worker pool.
//!
//! A [`WorkerPool`] runs N long-lived tokio tasks that drain one shared queue
//! of typed work items. Callers submit with [`WorkerPool::process`] and wait
//! for that item's result. Excess items simply queue.
//!
//! Worker count and per-item timeout can be changed while the pool runs;
//! changes are best-effort for items already being handled. The pool never
//! retries.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ── Handler trait ────────────────────────────────────────────────────

/// Handles one work item of type `T`.
#[async_trait]
pub trait WorkHandler<T>: Send + Sync + 'static {
    type Output: Send + 'static;
    type Error: Send + 'static;

    async fn handle(&self, item: T) -> Result<Self::Output, Self::Error>;
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PoolError<E> {
    #[error("{pool} pool item timed out after {after:?}")]
    Timeout { pool: String, after: Duration },

    #[error("{pool} pool is closed")]
    Closed { pool: String },

    #[error("{pool} pool worker panicked")]
    Panicked { pool: String },

    #[error("{0}")]
    Task(E),
}

// ── Internals ────────────────────────────────────────────────────────

type Reply<O, E> = oneshot::Sender<Result<O, PoolError<E>>>;

struct Task<T, O, E> {
    item: T,
    reply: Reply<O, E>,
}

type TaskOf<T, H> = Task<T, <H as WorkHandler<T>>::Output, <H as WorkHandler<T>>::Error>;

struct Shared<T, H: WorkHandler<T>> {
    name: String,
    handler: Arc<H>,
    queue: Mutex<mpsc::UnboundedReceiver<TaskOf<T, H>>>,
    /// Per-item timeout in milliseconds, 0 = none.
    timeout_ms: AtomicU64,
    target: AtomicUsize,
    live: AtomicUsize,
    closed: AtomicBool,
    /// Wakes idle workers after a resize or close.
    signal: Notify,
}

impl<T: Send + 'static, H: WorkHandler<T>> Shared<T, H> {
    fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Claim a retirement slot if more workers are live than wanted.
    fn try_retire(&self) -> bool {
        loop {
            let live = self.live.load(Ordering::SeqCst);
            if live <= self.target.load(Ordering::SeqCst) {
                return false;
            }
            if self
                .live
                .compare_exchange(live, live - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Handle one item on its own task so a timeout can abort it and a panic
    /// stays contained.
    async fn run(&self, item: T) -> Result<H::Output, PoolError<H::Error>> {
        let handler = Arc::clone(&self.handler);
        let mut work = tokio::spawn(async move { handler.handle(item).await });

        let joined = match self.timeout() {
            Some(after) => match tokio::time::timeout(after, &mut work).await {
                Ok(joined) => joined,
                Err(_) => {
                    work.abort();
                    warn!(pool = %self.name, ?after, "pool item timed out");
                    return Err(PoolError::Timeout {
                        pool: self.name.clone(),
                        after,
                    });
                }
            },
            None => work.await,
        };

        match joined {
            Ok(result) => result.map_err(PoolError::Task),
            Err(e) if e.is_panic() => {
                warn!(pool = %self.name, "pool handler panicked");
                Err(PoolError::Panicked {
                    pool: self.name.clone(),
                })
            }
            Err(_) => Err(PoolError::Closed {
                pool: self.name.clone(),
            }),
        }
    }
}

async fn worker_loop<T: Send + 'static, H: WorkHandler<T>>(shared: Arc<Shared<T, H>>, id: usize) {
    loop {
        let task = {
            let mut rx = shared.queue.lock().await;

            let signal = shared.signal.notified();
            tokio::pin!(signal);
            signal.as_mut().enable();

            if shared.try_retire() {
                debug!(pool = %shared.name, worker = id, "worker retired");
                return;
            }
            if shared.closed.load(Ordering::SeqCst) {
                // Stop intake; what is already queued still drains.
                rx.close();
            }

            tokio::select! {
                task = rx.recv() => task,
                _ = &mut signal => continue,
            }
        };

        let Some(task) = task else {
            shared.live.fetch_sub(1, Ordering::SeqCst);
            debug!(pool = %shared.name, worker = id, "worker exiting, queue closed");
            return;
        };

        // Caller stopped waiting (e.g. its stage timed out).
        if task.reply.is_closed() {
            continue;
        }

        let result = shared.run(task.item).await;
        let _ = task.reply.send(result);
    }
}

// ── WorkerPool ───────────────────────────────────────────────────────

/// N workers draining a shared queue of `T`, handled by `H`.
///
/// Must be created inside a tokio runtime.
pub struct WorkerPool<T, H: WorkHandler<T>> {
    shared: Arc<Shared<T, H>>,
    sender: mpsc::UnboundedSender<TaskOf<T, H>>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
    next_id: AtomicUsize,
}

impl<T: Send + 'static, H: WorkHandler<T>> WorkerPool<T, H> {
    /// Start a pool with `workers` workers (at least one) and no timeout.
    pub fn new(name: impl Into<String>, workers: usize, handler: H) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pool = Self {
            shared: Arc::new(Shared {
                name: name.into(),
                handler: Arc::new(handler),
                queue: Mutex::new(receiver),
                timeout_ms: AtomicU64::new(0),
                target: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                signal: Notify::new(),
            }),
            sender,
            handles: StdMutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        };
        pool.set_worker_count(workers.max(1));
        pool
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.set_timeout(Some(timeout));
        self
    }

    /// Submit one item and wait for its result.
    pub async fn process(&self, item: T) -> Result<H::Output, PoolError<H::Error>> {
        let closed = || PoolError::Closed {
            pool: self.shared.name.clone(),
        };
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(closed());
        }

        let (reply, response) = oneshot::channel();
        self.sender
            .send(Task { item, reply })
            .map_err(|_| closed())?;

        response.await.unwrap_or_else(|_| Err(closed()))
    }

    /// Resize the pool. Zero is ignored. Surplus workers leave once idle.
    pub fn set_worker_count(&self, workers: usize) {
        if workers == 0 {
            return;
        }
        let previous = self.shared.target.swap(workers, Ordering::SeqCst);
        let live = self.shared.live.load(Ordering::SeqCst);
        for _ in live..workers {
            self.spawn_worker();
        }
        if workers < previous {
            self.shared.signal.notify_waiters();
        }
        if previous != 0 && previous != workers {
            debug!(pool = %self.shared.name, from = previous, to = workers, "pool resized");
        }
    }

    /// Configured worker count.
    pub fn worker_count(&self) -> usize {
        self.shared.target.load(Ordering::SeqCst)
    }

    /// Workers currently running (converges to `worker_count` after a resize).
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Set or clear the per-item timeout. Applies to items started afterwards.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        let ms = timeout.map(|d| u64::try_from(d.as_millis().max(1)).unwrap_or(u64::MAX)).unwrap_or(0);
        self.shared.timeout_ms.store(ms, Ordering::SeqCst);
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.shared.timeout()
    }

    /// Stop accepting items. Queued items are still handled.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!(pool = %self.shared.name, "pool closing");
            self.shared.signal.notify_waiters();
        }
    }

    /// Close and wait for every worker to exit.
    pub async fn shutdown(&self) {
        self.close();
        let handles = match self.handles.lock() {
            Ok(mut h) => std::mem::take(&mut *h),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        futures::future::join_all(handles).await;
    }

    fn spawn_worker(&self) {
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(worker_loop(Arc::clone(&self.shared), id));
        match self.handles.lock() {
            Ok(mut h) => {
                h.retain(|w| !w.is_finished());
                h.push(handle);
            }
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }
}
