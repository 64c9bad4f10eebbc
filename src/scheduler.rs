//! Periodic task scheduler.
//!
//! Multiple independent tasks share one repeating timer. The timer starts
//! when the first task is registered (adopting that task's interval), and
//! stops when the last task is cancelled. Each tick runs every registered
//! callback synchronously, in registration order, on the scheduler's own
//! tokio task, not on the caller's thread.
//!
//! Cancellation is by task identity: an opaque id assigned from a process-
//! wide monotonic counter at task creation, never by callback equality.
//!
//! Callbacks must not call back into the scheduler; the task list is locked
//! while they run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Opaque task identity.
pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A repeating unit of work: identity, interval, callback.
pub struct PeriodicTask {
    id: TaskId,
    interval: Duration,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl PeriodicTask {
    pub fn new(interval: Duration, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            interval,
            callback: Box::new(callback),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

struct SchedulerInner {
    tasks: Vec<PeriodicTask>,
    interval: Duration,
    timer: Option<JoinHandle<()>>,
}

/// Shared-timer scheduler. Cheap to clone; clones drive the same timer.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
}

impl TaskScheduler {
    /// Scheduler with a default tick interval, applied until the first
    /// registered task (or `set_interval`) overrides it.
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                tasks: Vec::new(),
                interval,
                timer: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a task and start the timer if it is not already running.
    ///
    /// The first task to start the timer also sets its tick interval.
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, task: PeriodicTask) -> TaskId {
        let mut inner = self.lock();
        let id = task.id();
        if inner.timer.is_none() {
            inner.interval = task.interval();
        }
        inner.tasks.push(task);
        self.start_timer_if_needed(&mut inner);
        debug!(task_id = id, tasks = inner.tasks.len(), "task scheduled");
        id
    }

    /// Remove a task by identity. Unknown ids are a no-op. The timer stops
    /// when no tasks remain.
    pub fn cancel(&self, id: TaskId) {
        let mut inner = self.lock();
        inner.tasks.retain(|task| task.id() != id);
        if inner.tasks.is_empty() {
            if let Some(timer) = inner.timer.take() {
                timer.abort();
                debug!("last task cancelled, timer stopped");
            }
        }
    }

    /// Whether the shared timer is currently active.
    pub fn scheduled(&self) -> bool {
        self.lock().timer.is_some()
    }

    /// Change the tick interval. A running timer restarts with the new
    /// interval; registered tasks are preserved.
    pub fn set_interval(&self, interval: Duration) {
        let mut inner = self.lock();
        inner.interval = interval;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
            self.start_timer_if_needed(&mut inner);
        }
    }

    /// Stop the timer and drop all tasks.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.tasks.clear();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
    }

    fn start_timer_if_needed(&self, inner: &mut MutexGuard<'_, SchedulerInner>) {
        if inner.timer.is_some() || inner.tasks.is_empty() {
            return;
        }

        let interval = inner.interval;
        let shared = Arc::clone(&self.inner);
        inner.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately; swallow
            // it so callbacks only run after a full interval has elapsed.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let guard = shared
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                for task in &guard.tasks {
                    (task.callback)();
                }
            }
        }));
    }
}
