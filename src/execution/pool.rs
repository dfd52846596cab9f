//! Bounded worker pool with caller-runs backpressure

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use shardbridge_core::{Result, ShardBridgeError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Hand-over of the first job of a thread started above the core size
type Slot = Arc<Mutex<Option<Job>>>;

/// Idle time after which a thread above the core size exits
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Sizing of a worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name used for worker threads
    pub name: String,
    /// Threads kept alive for the lifetime of the pool
    pub core_size: usize,
    /// Upper bound on threads, reached only while the queue is full
    pub max_size: usize,
    /// Jobs waiting for a thread before new threads are started
    pub queue_capacity: usize,
    /// Idle time after which threads above `core_size` exit
    pub keep_alive: Duration,
}

impl PoolConfig {
    /// Pool for `pool_size` threads: core threads capped at the available
    /// parallelism, a queue as deep as the core, and growth up to `pool_size`
    pub fn sized<S: Into<String>>(name: S, pool_size: usize) -> Self {
        let parallelism = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let core_size = pool_size.min(parallelism).max(1);
        Self {
            name: name.into(),
            core_size,
            max_size: pool_size.max(core_size),
            queue_capacity: core_size,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

struct Shared {
    name: String,
    receiver: Receiver<Job>,
    live: AtomicUsize,
    active: AtomicUsize,
    spawned: AtomicUsize,
}

/// Fixed-core thread pool fed by a bounded queue.
///
/// When the queue is full and the pool is at its maximum size, the submitting
/// thread runs the job itself. Work is never dropped; after shutdown every job
/// runs on the caller.
pub struct WorkerPool {
    config: PoolConfig,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.core_size == 0 || config.max_size < config.core_size {
            return Err(ShardBridgeError::config(format!(
                "Invalid sizing for pool '{}': core {}, max {}",
                config.name, config.core_size, config.max_size
            )));
        }

        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity);
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            receiver,
            live: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            spawned: AtomicUsize::new(0),
        });

        let pool = Self {
            config,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Vec::new()),
            shared,
        };

        for _ in 0..pool.config.core_size {
            pool.shared.live.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = pool.spawn_worker(None, None) {
                pool.shared.live.fetch_sub(1, Ordering::SeqCst);
                pool.shutdown(Duration::from_secs(1));
                return Err(e);
            }
        }

        tracing::debug!(
            "Started pool '{}' (core {}, max {}, queue {})",
            pool.config.name,
            pool.config.core_size,
            pool.config.max_size,
            pool.config.queue_capacity
        );
        Ok(pool)
    }

    /// Submit a job
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock().clone();
        let job: Job = Box::new(job);

        let sender = match sender {
            Some(sender) => sender,
            None => {
                tracing::debug!("Pool '{}' is shut down, running job on caller", self.config.name);
                run_job(&self.config.name, job);
                return;
            }
        };

        let job = match sender.try_send(job) {
            Ok(()) => return,
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => job,
        };

        if self.reserve_extra_thread() {
            let slot: Slot = Arc::new(Mutex::new(Some(job)));
            match self.spawn_worker(Some(Arc::clone(&slot)), Some(self.config.keep_alive)) {
                Ok(()) => return,
                Err(e) => {
                    self.shared.live.fetch_sub(1, Ordering::SeqCst);
                    tracing::warn!("{}", e);
                    if let Some(job) = slot.lock().take() {
                        run_job(&self.config.name, job);
                    }
                    return;
                }
            }
        }

        tracing::trace!("Pool '{}' saturated, running job on caller", self.config.name);
        run_job(&self.config.name, job);
    }

    /// Stop accepting queued work and wait up to `timeout` for the workers to drain.
    ///
    /// Returns whether every worker finished in time.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        drop(self.sender.lock().take());

        let deadline = Instant::now() + timeout;
        let mut workers = std::mem::take(&mut *self.workers.lock());
        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                workers.into_iter().partition(|h| h.is_finished());
            for handle in finished {
                if handle.join().is_err() {
                    tracing::warn!("A worker of pool '{}' panicked", self.config.name);
                }
            }
            workers = running;

            if workers.is_empty() {
                tracing::debug!("Pool '{}' shut down", self.config.name);
                return true;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    "Pool '{}' still has {} busy worker(s) after {:?}",
                    self.config.name,
                    workers.len(),
                    timeout
                );
                // keep the stragglers so a later shutdown can still observe them
                self.workers.lock().extend(workers);
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Threads currently alive
    pub fn thread_count(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Threads currently running a job
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Jobs waiting in the queue
    pub fn queued(&self) -> usize {
        self.shared.receiver.len()
    }

    fn reserve_extra_thread(&self) -> bool {
        let max = self.config.max_size;
        self.shared
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < max).then_some(live + 1)
            })
            .is_ok()
    }

    /// Start a worker whose slot in `live` has already been reserved
    fn spawn_worker(&self, first: Option<Slot>, keep_alive: Option<Duration>) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let seq = shared.spawned.fetch_add(1, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.config.name, seq))
            .spawn(move || worker_loop(shared, first, keep_alive))
            .map_err(|e| {
                ShardBridgeError::internal(format!(
                    "Failed to spawn worker for pool '{}': {}",
                    self.config.name, e
                ))
            })?;

        let mut workers = self.workers.lock();
        workers.retain(|h| !h.is_finished());
        workers.push(handle);
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // close the queue; workers exit once it is drained
        self.sender.get_mut().take();
    }
}

fn worker_loop(shared: Arc<Shared>, first: Option<Slot>, keep_alive: Option<Duration>) {
    struct Live<'a>(&'a AtomicUsize);
    impl Drop for Live<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }
    let _live = Live(&shared.live);

    if let Some(job) = first.and_then(|slot| slot.lock().take()) {
        run_tracked(&shared, job);
    }

    loop {
        let job = match keep_alive {
            None => match shared.receiver.recv() {
                Ok(job) => job,
                Err(_) => break,
            },
            Some(keep_alive) => match shared.receiver.recv_timeout(keep_alive) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            },
        };
        run_tracked(&shared, job);
    }
}

fn run_tracked(shared: &Shared, job: Job) {
    shared.active.fetch_add(1, Ordering::SeqCst);
    run_job(&shared.name, job);
    shared.active.fetch_sub(1, Ordering::SeqCst);
}

fn run_job(pool: &str, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!("A job of pool '{}' panicked", pool);
    }
}
