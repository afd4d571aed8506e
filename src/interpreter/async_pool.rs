//! Fixed-size worker pool behind `breach` blocks.
//!
//! Tasks are queued on a bounded crossbeam channel; each task reports through
//! its own one-slot result channel, so `await` is a blocking receive instead of
//! a polling loop.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::interpreter::value::Value;
use crate::span::Span;

pub type TaskOutcome = Result<Value, RuntimeError>;

type Job = Box<dyn FnOnce() + Send + 'static>;

const QUEUE_CAPACITY: usize = 1024;

struct TaskInner {
    id: u64,
    receiver: Receiver<TaskOutcome>,
    outcome: Mutex<Option<TaskOutcome>>,
}

/// Handle to a submitted task. Clones refer to the same task.
#[derive(Clone)]
pub struct TaskHandle(Arc<TaskInner>);

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Block until the task finishes. Repeated joins return the same outcome.
    pub fn join(&self) -> TaskOutcome {
        let mut outcome = self.0.outcome.lock();
        if let Some(done) = outcome.as_ref() {
            return done.clone();
        }
        let result = self
            .0
            .receiver
            .recv()
            .unwrap_or_else(|_| Err(self.lost()));
        *outcome = Some(result.clone());
        result
    }

    /// Like `join`, but gives up at `deadline` and returns `None`.
    pub fn join_until(&self, deadline: Instant) -> Option<TaskOutcome> {
        let mut outcome = self.0.outcome.lock();
        if let Some(done) = outcome.as_ref() {
            return Some(done.clone());
        }
        let timeout = deadline.saturating_duration_since(Instant::now());
        let result = match self.0.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => Err(self.lost()),
        };
        *outcome = Some(result.clone());
        Some(result)
    }

    fn lost(&self) -> RuntimeError {
        RuntimeError::new(
            format!("Async task #{} terminated unexpectedly", self.0.id),
            Span::default(),
        )
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle(#{})", self.0.id)
    }
}

#[derive(Default)]
struct PoolState {
    next_id: u64,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

pub struct AsyncPool {
    size: usize,
    /// Native stack for each worker; `None` keeps the platform default.
    stack_size: Option<usize>,
    /// Guards task-id allocation and registration with the queue.
    state: Mutex<PoolState>,
}

impl AsyncPool {
    /// Workers are started on the first submission.
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            stack_size: None,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Workers run interpreter code, so they need as much stack as the
    /// thread that spawned the task.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn submit<F>(&self, task: F) -> std::io::Result<TaskHandle>
    where
        F: FnOnce() -> TaskOutcome + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.sender.is_none() {
            self.start_workers(&mut state)?;
        }
        state.next_id += 1;
        let id = state.next_id;

        let (result_tx, result_rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let _ = result_tx.send(task());
        });
        let sender = state
            .sender
            .as_ref()
            .ok_or_else(|| std::io::Error::other("async pool is not running"))?;
        sender
            .send(job)
            .map_err(|_| std::io::Error::other("async pool queue closed"))?;
        debug!(task = id, "submitted async task");

        Ok(TaskHandle(Arc::new(TaskInner {
            id,
            receiver: result_rx,
            outcome: Mutex::new(None),
        })))
    }

    fn start_workers(&self, state: &mut PoolState) -> std::io::Result<()> {
        let (tx, rx) = channel::bounded::<Job>(QUEUE_CAPACITY);
        for index in 0..self.size {
            let rx = rx.clone();
            let mut builder = std::thread::Builder::new().name(format!("reaper-breach-{}", index));
            if let Some(bytes) = self.stack_size {
                builder = builder.stack_size(bytes);
            }
            let handle = builder.spawn(move || worker_loop(rx))?;
            state.workers.push(handle);
        }
        debug!(workers = self.size, "started async pool");
        state.sender = Some(tx);
        Ok(())
    }

    /// Close the queue and wait for queued and in-flight tasks to finish.
    pub fn shutdown(&self) {
        let workers = {
            let mut state = self.state.lock();
            state.sender = None;
            std::mem::take(&mut state.workers)
        };
        let current = std::thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("async worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(jobs: Receiver<Job>) {
    for job in jobs.iter() {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
            warn!("async task panicked");
        }
    }
}

impl Drop for AsyncPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
