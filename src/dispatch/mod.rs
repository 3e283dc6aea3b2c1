//! In-process dispatch queue and worker lifecycle.
//!
//! The queue carries hints about documents that may need converting. It
//! delivers each descriptor at least once and makes no attempt at
//! deduplication; the conversion store's claim protocol decides who actually
//! does the work.

mod descriptor;
mod guard;

pub use descriptor::JobDescriptor;
pub use guard::InFlight;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::DispatchError;

/// Lifecycle of the worker pool attached to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Uninitialized,
    Running,
    ShuttingDown,
    Stopped,
}

/// A long-running consumer of a dispatch queue.
#[async_trait]
pub trait QueueWorker: Send + Sync + 'static {
    /// Consume descriptors until the queue asks for shutdown.
    async fn run(self: Arc<Self>, name: String, queue: Arc<DispatchQueue>);
}

/// FIFO of job descriptors plus the pool of workers draining it.
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<JobDescriptor>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobDescriptor>>,
    pending: AtomicUsize,
    in_flight: AtomicUsize,
    state: Mutex<QueueState>,
    shutdown_tx: watch::Sender<bool>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            pending: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            state: Mutex::new(QueueState::Uninitialized),
            shutdown_tx,
            workers: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a descriptor. Never blocks.
    pub fn enqueue(&self, job: JobDescriptor) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            // Unreachable while we own the receiver
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(
                "Dropped job {} for document {}: queue closed",
                job.descriptor_id, job.document_id
            );
        }
    }

    /// Take the next descriptor, waiting up to `timeout`.
    ///
    /// A returned descriptor counts as in flight until `mark_done`.
    pub async fn dequeue(&self, timeout: Duration) -> Option<JobDescriptor> {
        let next = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };

        match tokio::time::timeout(timeout, next).await {
            Ok(Some(job)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                Some(job)
            }
            Ok(None) | Err(_) => None,
        }
    }

    /// Finish accounting for a dequeued descriptor.
    pub fn mark_done(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Descriptors waiting to be dequeued.
    pub fn queue_size(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Descriptors dequeued but not yet marked done.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> QueueState {
        *self.lock_state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == QueueState::Running
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Receiver that flips to `true` when workers should stop.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn `count` workers on the current runtime.
    ///
    /// Returns the number of workers started: zero if the pool is already
    /// running. A stopped pool may be started again.
    pub async fn start_workers<W: QueueWorker>(
        self: &Arc<Self>,
        count: usize,
        worker: Arc<W>,
    ) -> Result<usize, DispatchError> {
        if count == 0 {
            return Err(DispatchError::NoWorkers);
        }

        let mut workers = self.workers.lock().await;
        {
            let mut state = self.lock_state();
            match *state {
                QueueState::Running => return Ok(0),
                QueueState::ShuttingDown => return Err(DispatchError::ShuttingDown),
                QueueState::Uninitialized | QueueState::Stopped => *state = QueueState::Running,
            }
        }
        self.shutdown_tx.send_replace(false);

        for i in 0..count {
            workers.spawn(worker.clone().run(format!("worker-{i}"), Arc::clone(self)));
        }

        info!("Started {} conversion workers", count);
        Ok(count)
    }

    /// Ask workers to stop and wait up to `grace` for them.
    ///
    /// Workers still running after the grace period are aborted; any
    /// descriptor they held goes back on the queue. Returns `true` if every
    /// worker exited on its own.
    pub async fn stop_workers(&self, grace: Duration) -> bool {
        let mut workers = self.workers.lock().await;
        {
            let mut state = self.lock_state();
            match *state {
                QueueState::Running => *state = QueueState::ShuttingDown,
                QueueState::Uninitialized | QueueState::Stopped => return true,
                QueueState::ShuttingDown => {}
            }
        }
        self.shutdown_tx.send_replace(true);
        info!("Stopping {} conversion workers", workers.len());

        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        warn!("Conversion worker panicked: {}", e);
                    }
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                "{} workers still busy after {:?}, cancelling",
                workers.len(),
                grace
            );
            workers.shutdown().await;
        }

        *self.lock_state() = QueueState::Stopped;
        info!(
            "Conversion workers stopped ({} descriptors queued)",
            self.queue_size()
        );
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Drains the queue, counting what it sees.
    struct CountingWorker {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl QueueWorker for CountingWorker {
        async fn run(self: Arc<Self>, _name: String, queue: Arc<DispatchQueue>) {
            while !queue.shutdown_requested() {
                if let Some(job) = queue.dequeue(Duration::from_millis(20)).await {
                    let guard = InFlight::new(queue.clone(), job);
                    self.seen.fetch_add(1, Ordering::SeqCst);
                    guard.finish();
                }
            }
        }
    }

    /// Holds a descriptor and never looks at the shutdown flag.
    struct StubbornWorker;

    #[async_trait]
    impl QueueWorker for StubbornWorker {
        async fn run(self: Arc<Self>, _name: String, queue: Arc<DispatchQueue>) {
            loop {
                if let Some(job) = queue.dequeue(Duration::from_millis(20)).await {
                    let _guard = InFlight::new(queue.clone(), job);
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_fifo_and_accounting() {
        let queue = DispatchQueue::new();
        assert_eq!(queue.state(), QueueState::Uninitialized);

        queue.enqueue(JobDescriptor::new(1, "a", 0));
        queue.enqueue(JobDescriptor::new(2, "b", 0));
        assert_eq!(queue.queue_size(), 2);

        let first = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        let second = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert_eq!((first.document_id, second.document_id), (1, 2));
        assert_eq!(queue.queue_size(), 0);
        assert_eq!(queue.in_flight(), 2);

        queue.mark_done();
        queue.mark_done();
        queue.mark_done();
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = DispatchQueue::new();
        let started = std::time::Instant::now();
        assert!(queue.dequeue(Duration::from_millis(30)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_restartable() {
        let queue = Arc::new(DispatchQueue::new());
        let worker = Arc::new(CountingWorker {
            seen: AtomicUsize::new(0),
        });

        assert!(matches!(
            queue.start_workers(0, worker.clone()).await,
            Err(DispatchError::NoWorkers)
        ));
        assert_eq!(queue.start_workers(2, worker.clone()).await.unwrap(), 2);
        assert_eq!(queue.start_workers(2, worker.clone()).await.unwrap(), 0);
        assert!(queue.is_running());

        for id in 0..5 {
            queue.enqueue(JobDescriptor::new(id, "x", 0));
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while worker.seen.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(queue.stop_workers(Duration::from_secs(5)).await);
        assert_eq!(queue.state(), QueueState::Stopped);
        assert_eq!(queue.in_flight(), 0);

        // Stopping twice is harmless; starting again gives a fresh pool
        assert!(queue.stop_workers(Duration::from_secs(1)).await);
        assert_eq!(queue.start_workers(1, worker.clone()).await.unwrap(), 1);
        assert!(!queue.shutdown_requested());
        assert!(queue.stop_workers(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_forced_stop_requeues_held_descriptor() {
        let queue = Arc::new(DispatchQueue::new());
        queue.start_workers(1, Arc::new(StubbornWorker)).await.unwrap();

        queue.enqueue(JobDescriptor::new(7, "held", 1));
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.in_flight() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(!queue.stop_workers(Duration::from_millis(100)).await);
        assert_eq!(queue.state(), QueueState::Stopped);
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.queue_size(), 1);

        let job = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert_eq!(job.document_id, 7);
        assert_eq!(job.retry_count, 1);
    }
}
