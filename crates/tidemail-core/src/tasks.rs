//! Single-slot background task runner.
//!
//! Long operations such as syncing a mailbox run on a tokio task so the
//! caller stays responsive. Only one runs at a time. Every outcome,
//! including failures, panics and kills, is logged and sent on the status
//! channel returned by [`TaskRunner::new`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::{Error, Result};

/// Name under which keep-alive NOOPs run.
pub const KEEP_ALIVE_TASK: &str = "keep-alive";

/// A change in the background slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// A task took the slot.
    Started(String),
    /// A task completed successfully.
    Finished(String),
    /// A task returned an error or panicked.
    Failed {
        /// Task name.
        name: String,
        /// Error message.
        error: String,
    },
    /// A task was aborted by [`TaskRunner::kill`].
    Killed(String),
}

#[derive(Debug)]
struct Running {
    id: u64,
    name: String,
    abort: AbortHandle,
}

/// Runs at most one background task at a time.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    slot: Arc<Mutex<Option<Running>>>,
    next_id: Arc<AtomicU64>,
    status: mpsc::UnboundedSender<TaskStatus>,
}

impl TaskRunner {
    /// Creates a runner and the receiving end of its status channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskStatus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(0)),
            status: tx,
        };
        (runner, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns `future` in the slot.
    ///
    /// Returns `Ok(false)` without running anything if the slot is taken
    /// and `skip_if_busy` is set. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if the slot is taken and `skip_if_busy` is
    /// not set.
    pub fn run<F>(&self, name: &str, skip_if_busy: bool, future: F) -> Result<bool>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut slot = self.lock();
        if let Some(running) = slot.as_ref() {
            if skip_if_busy {
                debug!("Skipping {name}: {} is running", running.name);
                return Ok(false);
            }
            return Err(Error::Busy(running.name.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.report(TaskStatus::Started(name.to_string()));
        let task = tokio::spawn(future);
        let abort = task.abort_handle();
        let watcher = self.clone();
        let task_name = name.to_string();
        tokio::spawn(async move {
            let status = match task.await {
                Ok(Ok(())) => {
                    debug!("Task {task_name} finished");
                    TaskStatus::Finished(task_name)
                }
                Ok(Err(e)) => {
                    warn!("Task {task_name} failed: {e}");
                    TaskStatus::Failed {
                        name: task_name,
                        error: e.to_string(),
                    }
                }
                Err(e) if e.is_cancelled() => {
                    info!("Task {task_name} killed");
                    TaskStatus::Killed(task_name)
                }
                Err(e) => {
                    warn!("Task {task_name} panicked: {e}");
                    TaskStatus::Failed {
                        name: task_name,
                        error: e.to_string(),
                    }
                }
            };
            watcher.release(id);
            watcher.report(status);
        });

        *slot = Some(Running {
            id,
            name: name.to_string(),
            abort,
        });
        Ok(true)
    }

    fn release(&self, id: u64) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|r| r.id == id) {
            *slot = None;
        }
    }

    fn report(&self, status: TaskStatus) {
        if self.status.send(status).is_err() {
            debug!("Task status receiver is gone");
        }
    }

    /// Whether a task occupies the slot.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }

    /// Name of the running task.
    #[must_use]
    pub fn running(&self) -> Option<String> {
        self.lock().as_ref().map(|r| r.name.clone())
    }

    /// Aborts the running task and frees the slot. Returns false if nothing
    /// was running.
    pub fn kill(&self) -> bool {
        let Some(running) = self.lock().take() else {
            return false;
        };
        info!("Killing task {}", running.name);
        running.abort.abort();
        true
    }
}

/// Sends NOOP through `runner` every `interval` while a session is open.
///
/// Ticks that find the slot busy are skipped. The returned handle stops the
/// loop when aborted.
pub fn spawn_keep_alive(
    runner: TaskRunner,
    connection: Arc<Connection>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let connection = Arc::clone(&connection);
            let keep_alive = async move {
                if connection.noop_if_connected().await? {
                    debug!("Keep-alive NOOP sent");
                }
                Ok(())
            };
            if let Err(e) = runner.run(KEEP_ALIVE_TASK, true, keep_alive) {
                warn!("Keep-alive not scheduled: {e}");
            }
        }
    })
}
