// affinity.rs - Execution affinity for bound native objects
//
// Every Channel runs its native calls on exactly one target: a serial queue
// (one worker, FIFO) or a caller-owned dedicated thread. Fire-and-forget
// calls are submitted; synchronous round trips block the caller on a
// one-shot completion channel until the target has produced the value.

use crate::error::BridgeError;
use crossbeam_channel::{Receiver, Sender};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error};

/// Label of the process-wide default queue.
pub const DEFAULT_QUEUE_LABEL: &str = "io.latch.scripting.default-queue";

static SHARED_QUEUE: OnceCell<SerialQueue> = OnceCell::new();

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Job {
    Run(Task),
    Shutdown,
}

/// One OS thread draining a job channel in submission order.
struct Worker {
    label: String,
    sender: Sender<Job>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn spawn(label: &str) -> Result<Self, BridgeError> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let name = label.to_owned();
        let handle = thread::Builder::new()
            .name(label.to_owned())
            .spawn(move || Self::run(&name, receiver))
            .map_err(|e| BridgeError::Affinity(format!("cannot spawn '{}': {}", label, e)))?;

        debug!(worker = label, "execution affinity started");
        Ok(Self {
            label: label.to_owned(),
            sender,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run(label: &str, receiver: Receiver<Job>) {
        for job in receiver.iter() {
            match job {
                Job::Run(task) => task(),
                Job::Shutdown => break,
            }
        }
        debug!(worker = label, "execution affinity stopped");
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn enqueue(&self, task: Task) -> Result<(), BridgeError> {
        self.sender
            .send(Job::Run(task))
            .map_err(|_| BridgeError::Affinity(format!("'{}' has shut down", self.label)))
    }

    fn submit<F>(&self, task: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let label = self.label.clone();
        self.enqueue(Box::new(move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                error!(worker = %label, "native task panicked: {}", panic_message(&*payload));
            }
        }))
    }

    fn run_sync<F, R>(&self, task: F) -> Result<R, BridgeError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Err(BridgeError::Affinity(format!(
                "synchronous call re-entered '{}' from its own worker",
                self.label
            )));
        }

        let (done, completion) = crossbeam_channel::bounded(1);
        self.enqueue(Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(task))
                .map_err(|payload| BridgeError::NativeInvocation(panic_message(&*payload)));
            // The caller only goes away if its own thread died.
            let _ = done.send(outcome);
        }))?;

        completion.recv().map_err(|_| {
            BridgeError::Affinity(format!("'{}' stopped before completing the call", self.label))
        })?
    }

    /// Wait for everything submitted so far.
    fn flush(&self) -> Result<(), BridgeError> {
        if self.is_current() {
            return Ok(());
        }
        self.run_sync(|| ())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.sender.send(Job::Shutdown);
        if self.is_current() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!(worker = %self.label, "execution affinity thread panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "native code panicked".to_owned()
    }
}

/// Serial queue: one task at a time, in submission order. Handles are cheap
/// to clone and share one worker.
#[derive(Clone)]
pub struct SerialQueue {
    worker: Arc<Worker>,
}

impl SerialQueue {
    pub fn new(label: &str) -> Result<Self, BridgeError> {
        Ok(Self {
            worker: Arc::new(Worker::spawn(label)?),
        })
    }

    /// The process-wide default queue, started on first use.
    pub fn shared() -> Result<Self, BridgeError> {
        SHARED_QUEUE
            .get_or_try_init(|| SerialQueue::new(DEFAULT_QUEUE_LABEL))
            .cloned()
    }

    pub fn label(&self) -> &str {
        &self.worker.label
    }

    pub fn submit<F>(&self, task: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.worker.submit(task)
    }

    pub fn run_sync<F, R>(&self, task: F) -> Result<R, BridgeError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.worker.run_sync(task)
    }

    pub fn flush(&self) -> Result<(), BridgeError> {
        self.worker.flush()
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SerialQueue").field(&self.worker.label).finish()
    }
}

/// Dedicated thread owned by the caller. Dropping it stops and joins the
/// thread once queued work has run.
pub struct WorkerThread {
    worker: Worker,
}

impl WorkerThread {
    pub fn spawn(name: &str) -> Result<Self, BridgeError> {
        Ok(Self {
            worker: Worker::spawn(name)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.worker.label
    }

    pub fn thread_id(&self) -> ThreadId {
        self.worker.thread_id
    }

    pub fn submit<F>(&self, task: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.worker.submit(task)
    }

    pub fn run_sync<F, R>(&self, task: F) -> Result<R, BridgeError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.worker.run_sync(task)
    }
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WorkerThread").field(&self.worker.label).finish()
    }
}

/// Where a Channel runs native calls. Fixed for the Channel's lifetime.
#[derive(Clone, Debug)]
pub enum ExecutionAffinity {
    Queue(SerialQueue),
    Thread(Arc<WorkerThread>),
}

impl ExecutionAffinity {
    pub fn shared_queue() -> Result<Self, BridgeError> {
        SerialQueue::shared().map(ExecutionAffinity::Queue)
    }

    pub fn dedicated_thread(name: &str) -> Result<Self, BridgeError> {
        WorkerThread::spawn(name).map(|thread| ExecutionAffinity::Thread(Arc::new(thread)))
    }

    fn worker(&self) -> &Worker {
        match self {
            ExecutionAffinity::Queue(queue) => &queue.worker,
            ExecutionAffinity::Thread(thread) => &thread.worker,
        }
    }

    pub fn label(&self) -> &str {
        &self.worker().label
    }

    /// Whether the calling thread is this affinity's worker.
    pub fn is_current(&self) -> bool {
        self.worker().is_current()
    }

    pub fn submit<F>(&self, task: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.worker().submit(task)
    }

    pub fn run_sync<F, R>(&self, task: F) -> Result<R, BridgeError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.worker().run_sync(task)
    }

    pub fn flush(&self) -> Result<(), BridgeError> {
        self.worker().flush()
    }
}

impl From<SerialQueue> for ExecutionAffinity {
    fn from(queue: SerialQueue) -> Self {
        ExecutionAffinity::Queue(queue)
    }
}

impl From<WorkerThread> for ExecutionAffinity {
    fn from(thread: WorkerThread) -> Self {
        ExecutionAffinity::Thread(Arc::new(thread))
    }
}
