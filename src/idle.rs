//! Idle scheduling: "run when idle, else after a timeout"
//!
//! Delayed services queue their construction here. Access before the task
//! runs builds the service synchronously and cancels the task.

use crate::{Disposable, lock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SendError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[cfg(feature = "logging")]
use tracing::{trace, warn};

/// Work queued for an idle moment
pub type IdleTask = Box<dyn FnOnce() + Send>;

/// Cancellation handle of a scheduled task
#[derive(Debug, Clone, Default)]
pub struct IdleHandle {
    cancelled: Arc<AtomicBool>,
}

impl IdleHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running if it has not started
    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Disposable for IdleHandle {
    fn dispose(&self) {
        self.cancel();
    }
}

/// Host hook for idle-time work
pub trait IdleScheduler: Send + Sync {
    /// Queue `task`; it must not run once the returned handle is cancelled
    fn schedule(&self, task: IdleTask) -> IdleHandle;
}

/// Scheduler pumped explicitly by the host event loop.
///
/// # Examples
///
/// ```rust
/// use instantiation_service::{IdleScheduler, ManualIdleScheduler};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let scheduler = ManualIdleScheduler::new();
/// let ran = Arc::new(AtomicBool::new(false));
///
/// let flag = ran.clone();
/// scheduler.schedule(Box::new(move || flag.store(true, Ordering::SeqCst)));
/// assert_eq!(scheduler.pending(), 1);
///
/// assert_eq!(scheduler.run_idle_tasks(), 1);
/// assert!(ran.load(Ordering::SeqCst));
/// ```
#[derive(Default)]
pub struct ManualIdleScheduler {
    queue: Mutex<VecDeque<(IdleHandle, IdleTask)>>,
}

impl ManualIdleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every task queued so far, returning how many ran.
    /// Tasks queued while running wait for the next call.
    pub fn run_idle_tasks(&self) -> usize {
        let queued = std::mem::take(&mut *lock(&self.queue));
        let mut ran = 0;
        for (handle, task) in queued {
            if handle.is_cancelled() {
                continue;
            }
            task();
            ran += 1;
        }
        ran
    }

    /// Queued tasks not cancelled yet
    pub fn pending(&self) -> usize {
        lock(&self.queue)
            .iter()
            .filter(|(handle, _)| !handle.is_cancelled())
            .count()
    }
}

impl IdleScheduler for ManualIdleScheduler {
    fn schedule(&self, task: IdleTask) -> IdleHandle {
        let handle = IdleHandle::new();
        lock(&self.queue).push_back((handle.clone(), task));
        handle
    }
}

impl std::fmt::Debug for ManualIdleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualIdleScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Scheduler that runs tasks after a timeout on one helper thread.
///
/// Tasks run one after another in the order they were queued. The thread
/// starts with the first task and exits when the scheduler is dropped.
pub struct TimerIdleScheduler {
    timeout: Duration,
    queue: Mutex<Option<Sender<Queued>>>,
}

struct Queued {
    due: Instant,
    handle: IdleHandle,
    task: IdleTask,
}

impl TimerIdleScheduler {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            queue: Mutex::new(None),
        }
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn spawn_worker() -> std::io::Result<Sender<Queued>> {
        let (sender, receiver) = mpsc::channel::<Queued>();
        std::thread::Builder::new()
            .name("idle-scheduler".into())
            .spawn(move || {
                // due times never decrease: one timeout, FIFO queue
                for queued in receiver {
                    let now = Instant::now();
                    if queued.due > now {
                        std::thread::sleep(queued.due - now);
                    }
                    if !queued.handle.is_cancelled() {
                        (queued.task)();
                    }
                }
            })?;
        Ok(sender)
    }
}

impl Default for TimerIdleScheduler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

impl IdleScheduler for TimerIdleScheduler {
    fn schedule(&self, task: IdleTask) -> IdleHandle {
        let handle = IdleHandle::new();
        let mut queued = Queued {
            due: Instant::now() + self.timeout,
            handle: handle.clone(),
            task,
        };

        let mut queue = lock(&self.queue);
        // a second attempt restarts a worker that went away
        for _ in 0..2 {
            if queue.is_none() {
                match Self::spawn_worker() {
                    Ok(sender) => *queue = Some(sender),
                    Err(_e) => {
                        #[cfg(feature = "logging")]
                        warn!(
                            target: "instantiation_service",
                            error = %_e,
                            "Failed to spawn idle thread; task will run on first access"
                        );
                        return handle;
                    }
                }
            }
            let Some(sender) = queue.as_ref() else {
                break;
            };
            match sender.send(queued) {
                Ok(()) => {
                    #[cfg(feature = "logging")]
                    trace!(
                        target: "instantiation_service",
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Scheduled idle task"
                    );
                    return handle;
                }
                Err(SendError(returned)) => {
                    queued = returned;
                    *queue = None;
                }
            }
        }
        handle
    }
}

impl std::fmt::Debug for TimerIdleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerIdleScheduler")
            .field("timeout", &self.timeout)
            .field("running", &lock(&self.queue).is_some())
            .finish()
    }
}

/// Scheduler that runs each task on a tokio runtime after a timeout
#[cfg(feature = "async")]
#[derive(Debug, Clone)]
pub struct TokioIdleScheduler {
    handle: tokio::runtime::Handle,
    timeout: Duration,
}

#[cfg(feature = "async")]
impl TokioIdleScheduler {
    pub fn from_handle(handle: tokio::runtime::Handle, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    /// Use the runtime of the calling context, if any
    pub fn try_current(timeout: Duration) -> Option<Self> {
        tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| Self::from_handle(handle, timeout))
    }
}

#[cfg(feature = "async")]
impl IdleScheduler for TokioIdleScheduler {
    fn schedule(&self, task: IdleTask) -> IdleHandle {
        let handle = IdleHandle::new();
        let cancelled = handle.clone();
        let timeout = self.timeout;

        self.handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if cancelled.is_cancelled() {
                return;
            }
            // Constructors are synchronous and may block
            let _ = tokio::task::spawn_blocking(task).await;
        });
        handle
    }
}
