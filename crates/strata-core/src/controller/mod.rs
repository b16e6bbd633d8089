//! Task queue and single-worker execution.
//!
//! Producers (the watch loop, the bundle loader, the CLI) only enqueue. One
//! caller at a time drains the queue through
//! [`Controller::execute_scheduled_operations`], which holds the worker lock
//! for the whole cycle so tasks never interleave.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::error::ControllerError;
use crate::state::ResourceRecord;
use crate::task::{InstallTask, TaskContext, TaskOutcome, UninstallTask};
use crate::types::{Payload, ResourceId};

/// Kind of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Install,
    Uninstall,
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub kind: TaskKind,
    pub id: ResourceId,
    /// Content to install; `None` for uninstalls
    pub payload: Option<Payload>,
}

impl PendingTask {
    pub fn install(id: ResourceId, payload: Payload) -> Self {
        Self {
            kind: TaskKind::Install,
            id,
            payload: Some(payload),
        }
    }

    pub fn uninstall(id: ResourceId) -> Self {
        Self {
            kind: TaskKind::Uninstall,
            id,
            payload: None,
        }
    }

    fn execute(&self, ctx: &mut TaskContext) -> Result<TaskOutcome, ControllerError> {
        match (self.kind, &self.payload) {
            (TaskKind::Install, Some(payload)) => {
                InstallTask::new(self.id.clone(), payload.clone()).execute(ctx)
            }
            (TaskKind::Install, None) => {
                tracing::debug!(id = %self.id, "install without content, leaving it pending");
                Ok(TaskOutcome::Pending)
            }
            (TaskKind::Uninstall, _) => UninstallTask::new(self.id.clone()).execute(ctx),
        }
    }
}

/// Outcome of one executed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub id: ResourceId,
    pub kind: TaskKind,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

/// A task that failed with a recoverable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub id: ResourceId,
    pub kind: TaskKind,
    pub error: String,
}

/// Summary of one `execute_scheduled_operations` cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub executed: Vec<TaskReport>,
    pub failed: Vec<TaskFailure>,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.failed.is_empty()
    }

    /// Number of tasks that changed the runtime.
    pub fn changed(&self) -> usize {
        self.executed.iter().filter(|r| r.outcome.changed()).count()
    }

    pub fn outcome_of(&self, id: &ResourceId) -> Option<&TaskOutcome> {
        self.executed
            .iter()
            .rev()
            .find(|r| &r.id == id)
            .map(|r| &r.outcome)
    }
}

/// Owns the task queue and the worker context.
#[derive(Debug)]
pub struct Controller {
    queue: Mutex<VecDeque<PendingTask>>,
    worker: Mutex<TaskContext>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Controller {
    pub fn new(context: TaskContext) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            worker: Mutex::new(context),
        }
    }

    /// Queue an install. Replaces any queued task for the same id.
    pub fn schedule_install(&self, id: ResourceId, payload: Payload) {
        self.schedule(PendingTask::install(id, payload));
    }

    /// Queue an uninstall. Replaces any queued task for the same id.
    pub fn schedule_uninstall(&self, id: ResourceId) {
        self.schedule(PendingTask::uninstall(id));
    }

    /// Queue a task; an earlier entry for the same id is dropped and the new
    /// one goes to the back of the queue.
    pub fn schedule(&self, task: PendingTask) {
        let mut queue = lock(&self.queue);
        let before = queue.len();
        queue.retain(|queued| queued.id != task.id);
        tracing::debug!(
            id = %task.id,
            kind = ?task.kind,
            replaced = before != queue.len(),
            "scheduled task"
        );
        queue.push_back(task);
    }

    /// Put a failed task back at the end of the queue, unless a newer task
    /// for the same id was scheduled while it ran.
    fn requeue(&self, task: PendingTask) {
        let mut queue = lock(&self.queue);
        if queue.iter().any(|queued| queued.id == task.id) {
            tracing::debug!(id = %task.id, "newer task queued, not retrying");
            return;
        }
        queue.push_back(task);
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Snapshot of the queued tasks in execution order.
    pub fn pending_tasks(&self) -> Vec<PendingTask> {
        lock(&self.queue).iter().cloned().collect()
    }

    /// Drain the queue in submission order.
    ///
    /// Recoverable failures (malformed content) are reported and the cycle
    /// continues. Any other failure ends the cycle: the failing task goes back
    /// to the end of the queue and is retried by the next cycle, after the
    /// entries that were still waiting.
    pub fn execute_scheduled_operations(&self) -> Result<CycleReport, ControllerError> {
        let mut ctx = lock(&self.worker);
        let mut report = CycleReport::default();

        loop {
            // Release the queue between tasks so producers never wait on a task
            let Some(task) = lock(&self.queue).pop_front() else {
                break;
            };
            let id = task.id.clone();
            let kind = task.kind;

            match task.execute(&mut ctx) {
                Ok(outcome) => report.executed.push(TaskReport { id, kind, outcome }),
                Err(err) if err.is_recoverable() => {
                    tracing::warn!(id = %id, error = %err, "skipping resource");
                    report.failed.push(TaskFailure {
                        id,
                        kind,
                        error: err.to_string(),
                    });
                }
                Err(err) => {
                    self.requeue(task);
                    tracing::error!(
                        id = %id,
                        error = %err,
                        remaining = self.pending_count(),
                        "cycle aborted"
                    );
                    return Err(err);
                }
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                executed = report.executed.len(),
                failed = report.failed.len(),
                changed = report.changed(),
                "cycle finished"
            );
        }
        Ok(report)
    }

    /// Ids of all recorded resources, sorted.
    pub fn installed_ids(&self) -> Vec<ResourceId> {
        lock(&self.worker).state.ids()
    }

    pub fn record(&self, id: &ResourceId) -> Option<ResourceRecord> {
        lock(&self.worker).state.get(id).cloned()
    }

    pub fn records(&self) -> Vec<ResourceRecord> {
        lock(&self.worker).state.records().cloned().collect()
    }

    /// Run `f` inside the worker context, serialized with task execution.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut TaskContext) -> R) -> R {
        let mut ctx = lock(&self.worker);
        f(&mut *ctx)
    }
}
