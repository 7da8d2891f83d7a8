//! Per-category FIFO queues, each drained by one long-lived worker thread.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::controller::TaskController;
use crate::error::AppError;
use crate::job::{JobId, JobKind, JobObserver, JobSpec};
use crate::worker::JobExecutor;

pub struct QueuedJob {
    pub id: JobId,
    pub spec: JobSpec,
    pub controller: TaskController,
    pub observer: JobObserver,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<QueuedJob>,
    closed: bool,
}

#[derive(Default)]
struct QueueShared {
    state: Mutex<QueueState>,
    available: Condvar,
}

/// FIFO for one job kind. Jobs run one at a time, in enqueue order.
pub struct JobQueue {
    kind: JobKind,
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn spawn(kind: JobKind, executor: Arc<JobExecutor>) -> Result<Self, AppError> {
        let shared = Arc::new(QueueShared::default());
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("vidqueue-{}", kind.as_str()))
            .spawn(move || worker_loop(kind, &worker_shared, &executor))?;
        Ok(Self {
            kind,
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Appends a job; never blocks on execution. Fails once the queue is closed.
    pub fn enqueue(&self, job: QueuedJob) -> Result<(), AppError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(AppError::Internal(format!(
                "{} queue is shut down",
                self.kind.as_str()
            )));
        }
        state.jobs.push_back(job);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Jobs waiting to start (the running one is not counted).
    pub fn len(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting jobs. The worker still drains what is queued.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.available.notify_all();
    }

    pub fn join(&self) {
        if let Some(handle) = self.worker.lock().take()
            && handle.join().is_err()
        {
            log::error!(
                target: "vidqueue::queue",
                "{} worker thread panicked",
                self.kind.as_str()
            );
        }
    }
}

fn next_job(shared: &QueueShared) -> Option<QueuedJob> {
    let mut state = shared.state.lock();
    loop {
        if let Some(job) = state.jobs.pop_front() {
            return Some(job);
        }
        if state.closed {
            return None;
        }
        shared.available.wait(&mut state);
    }
}

fn worker_loop(kind: JobKind, shared: &QueueShared, executor: &JobExecutor) {
    log::debug!(target: "vidqueue::queue", "{} worker started", kind.as_str());
    while let Some(job) = next_job(shared) {
        log::debug!(
            target: "vidqueue::queue",
            "{} worker picked job {}",
            kind.as_str(),
            job.id
        );
        // execute() converts panics and errors into a terminal outcome.
        executor.execute(job.id, &job.spec, &job.controller, job.observer);
    }
    log::debug!(target: "vidqueue::queue", "{} worker exiting", kind.as_str());
}

/// Routes jobs to the queue of their kind and assigns ids.
pub struct JobDispatcher {
    queues: HashMap<JobKind, JobQueue>,
    next_id: AtomicU64,
}

impl JobDispatcher {
    pub fn new(executor: JobExecutor) -> Result<Self, AppError> {
        let executor = Arc::new(executor);
        let mut queues = HashMap::with_capacity(JobKind::ALL.len());
        for kind in JobKind::ALL {
            queues.insert(kind, JobQueue::spawn(kind, Arc::clone(&executor))?);
        }
        Ok(Self {
            queues,
            next_id: AtomicU64::new(1),
        })
    }

    fn queue(&self, kind: JobKind) -> Result<&JobQueue, AppError> {
        self.queues
            .get(&kind)
            .ok_or_else(|| AppError::Internal(format!("no queue for {}", kind.as_str())))
    }

    /// Queues the job. The observer's completion fires later on the worker thread;
    /// it is dropped without firing only when this returns an error.
    pub fn submit(
        &self,
        spec: JobSpec,
        controller: TaskController,
        observer: JobObserver,
    ) -> Result<JobId, AppError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = spec.kind();
        self.queue(kind)?.enqueue(QueuedJob {
            id,
            spec,
            controller,
            observer,
        })?;
        log::info!(target: "vidqueue::queue", "Queued {} job {}", kind.as_str(), id);
        Ok(id)
    }

    pub fn pending(&self, kind: JobKind) -> usize {
        self.queues.get(&kind).map_or(0, JobQueue::len)
    }

    /// Stops accepting jobs, lets every worker drain its queue, and joins them.
    pub fn shutdown(&self) {
        for queue in self.queues.values() {
            queue.close();
        }
        for queue in self.queues.values() {
            queue.join();
        }
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
