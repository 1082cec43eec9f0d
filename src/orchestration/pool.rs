//! Bounded pool of async workers fed through a single-slot hand-off channel.
//!
//! A submission completes as soon as one of these happens: an idle worker
//! takes the job, a new worker can be started for it, the caller's token is
//! cancelled, or `max_wait` elapses. Workers with nothing to do for
//! `idle_timeout` exit and give their slot back.

use super::cancel::CancelToken;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error};

pub type Job = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_workers: usize,
    pub max_wait: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 100,
            max_wait: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("submission cancelled")]
    Cancelled,
    #[error("no worker available within {0:?}")]
    Timeout(Duration),
    #[error("worker pool closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub alive: usize,
    pub idle: usize,
    pub max_workers: usize,
}

#[derive(Debug)]
struct Shared {
    jobs: Mutex<mpsc::Receiver<Job>>,
    alive: AtomicUsize,
    idle: AtomicUsize,
    idle_timeout: Duration,
}

#[derive(Debug)]
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    shared: Arc<Shared>,
    slots: Arc<Semaphore>,
    config: PoolConfig,
}

enum Handoff<'a> {
    Queue(mpsc::Permit<'a, Job>),
    Spawn(OwnedSemaphorePermit),
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            shared: Arc::new(Shared {
                jobs: Mutex::new(rx),
                alive: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                idle_timeout: config.idle_timeout,
            }),
            slots: Arc::new(Semaphore::new(config.max_workers.max(1))),
            config,
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            alive: self.shared.alive.load(Ordering::SeqCst),
            idle: self.shared.idle.load(Ordering::SeqCst),
            max_workers: self.config.max_workers,
        }
    }

    /// Hand `job` to a worker.
    pub async fn submit(&self, ctx: &CancelToken, job: Job) -> Result<(), PoolError> {
        if ctx.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        if self.shared.idle.load(Ordering::SeqCst) == 0 {
            if let Ok(permit) = self.slots.clone().try_acquire_owned() {
                self.start_worker(permit, Some(job));
                return Ok(());
            }
        }

        let handoff = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(PoolError::Cancelled),
            permit = self.tx.reserve() => match permit {
                Ok(p) => Handoff::Queue(p),
                Err(_) => return Err(PoolError::Closed),
            },
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(p) => Handoff::Spawn(p),
                Err(_) => return Err(PoolError::Closed),
            },
            _ = tokio::time::sleep(self.config.max_wait) => {
                return Err(PoolError::Timeout(self.config.max_wait));
            }
        };

        match handoff {
            Handoff::Queue(permit) => {
                permit.send(job);
                // Every worker may have timed out since the idle check.
                if self.shared.alive.load(Ordering::SeqCst) == 0 {
                    if let Ok(slot) = self.slots.clone().try_acquire_owned() {
                        self.start_worker(slot, None);
                    }
                }
            }
            Handoff::Spawn(slot) => self.start_worker(slot, Some(job)),
        }
        Ok(())
    }

    /// Run `fut` on the pool and receive its output. The receiver errors if
    /// the job panics.
    pub async fn spawn<F, T>(
        &self,
        ctx: &CancelToken,
        fut: F,
    ) -> Result<oneshot::Receiver<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(
            ctx,
            async move {
                let _ = tx.send(fut.await);
            }
            .boxed(),
        )
        .await?;
        Ok(rx)
    }

    fn start_worker(&self, slot: OwnedSemaphorePermit, first: Option<Job>) {
        self.shared.alive.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(worker_loop(self.shared.clone(), slot, first));
    }
}

async fn run_job(job: Job) {
    if AssertUnwindSafe(job).catch_unwind().await.is_err() {
        error!("pool job panicked");
    }
}

async fn worker_loop(shared: Arc<Shared>, slot: OwnedSemaphorePermit, first: Option<Job>) {
    if let Some(job) = first {
        run_job(job).await;
    }

    loop {
        shared.idle.fetch_add(1, Ordering::SeqCst);
        let next = tokio::time::timeout(shared.idle_timeout, async {
            let mut jobs = shared.jobs.lock().await;
            jobs.recv().await
        })
        .await;
        shared.idle.fetch_sub(1, Ordering::SeqCst);

        match next {
            Ok(Some(job)) => run_job(job).await,
            Ok(None) => {
                // Pool dropped and the queue is drained.
                shared.alive.fetch_sub(1, Ordering::SeqCst);
                break;
            }
            Err(_) => {
                shared.alive.fetch_sub(1, Ordering::SeqCst);
                // A job queued right before the decrement would otherwise be stranded.
                let late = match shared.jobs.try_lock() {
                    Ok(mut jobs) => jobs.try_recv().ok(),
                    Err(_) => None,
                };
                match late {
                    Some(job) => {
                        shared.alive.fetch_add(1, Ordering::SeqCst);
                        run_job(job).await;
                    }
                    None => {
                        debug!("idle worker exiting");
                        break;
                    }
                }
            }
        }
    }
    drop(slot);
}

/// Owner of the current pool. Reconfiguring swaps in a new pool; the old
/// one finishes queued work and winds down once its last user drops it.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    current: Arc<RwLock<Arc<WorkerPool>>>,
}

impl PoolHandle {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(WorkerPool::new(config)))),
        }
    }

    pub fn current(&self) -> Arc<WorkerPool> {
        self.current.read().clone()
    }

    pub fn reconfigure(&self, config: PoolConfig) {
        let fresh = Arc::new(WorkerPool::new(config));
        let old = std::mem::replace(&mut *self.current.write(), fresh);
        debug!(old = ?old.config(), new = ?config, "worker pool reconfigured");
    }
}
