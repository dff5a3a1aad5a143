// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task data model and state machine
//!
//! A task couples an execution spec (registry key + arguments) with its
//! resolution state: a state machine and a write-once result slot. The
//! handle is cheaply cloneable; callers, chains, and dependents all hold
//! the same `Arc`'d inner. Only the scheduler and pool manager mutate
//! state after submission.

use crate::error::TaskError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::watch;

/// Unique identifier for a task (unique per submission, not globally enforced)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        TaskId(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        TaskId(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

/// The state of a task
///
/// Progression is monotonic along
/// `Created → Queued → Dispatched → Running → Completed | Failed`, with two
/// exceptions: `Cancelled` is reachable from any non-terminal state (from
/// `Running` only through an acknowledged cancellation), and a crashed
/// worker re-queues its task (`Dispatched`/`Running → Queued`) while retry
/// budget remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    Queued,
    Dispatched,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Whether the task has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Transition table; every edge not listed here is invalid
    pub fn allows(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Created, Queued)
                | (Created, Cancelled)
                | (Queued, Dispatched)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Dispatched, Running)
                | (Dispatched, Queued)
                | (Dispatched, Failed)
                | (Dispatched, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Queued)
                | (Running, Cancelled)
        )
    }
}

/// Write-once container for the task outcome; readers wait until populated
struct ResultSlot {
    tx: watch::Sender<Option<Result<Value, TaskError>>>,
}

impl ResultSlot {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// First write wins; later writes are ignored
    fn set(&self, outcome: Result<Value, TaskError>) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome);
                true
            } else {
                false
            }
        })
    }

    fn peek(&self) -> Option<Result<Value, TaskError>> {
        self.tx.borrow().clone()
    }

    async fn wait(&self) -> Result<Value, TaskError> {
        let mut rx = self.tx.subscribe();
        // Bound so the borrow of `rx` ends before `rx` drops.
        let filled = rx.wait_for(|slot| slot.is_some()).await;
        match filled {
            // The sender lives in the task inner, so the channel cannot
            // close while this handle exists; both fallbacks are unreachable.
            Ok(slot) => slot.clone().unwrap_or(Err(TaskError::Cancelled)),
            Err(_) => Err(TaskError::Cancelled),
        }
    }
}

/// Hook installed at submission so `Task::cancel` can reach the scheduler
pub trait CancelHook: Send + Sync {
    fn request_cancel(&self, id: &TaskId);
}

struct TaskInner {
    id: TaskId,
    name: String,
    func: String,
    args: Vec<Value>,
    kwargs: HashMap<String, Value>,
    result_name: String,
    base_priority: i64,
    execution_timeout: Option<Duration>,
    created_at: DateTime<Utc>,
    // Wired by chain construction, sealed once the task leaves Created
    arg_deps: Mutex<HashMap<String, TaskId>>,
    state: Mutex<TaskState>,
    slot: ResultSlot,
    cancel: OnceLock<Arc<dyn CancelHook>>,
}

/// A unit of work plus its resolution state
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Start building a task that runs the callable registered under `func`
    pub fn builder(name: impl Into<String>, func: impl Into<String>) -> TaskBuilder {
        TaskBuilder {
            id: None,
            name: name.into(),
            func: func.into(),
            args: Vec::new(),
            kwargs: HashMap::new(),
            result_name: "result".to_string(),
            base_priority: 0,
            execution_timeout: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn func(&self) -> &str {
        &self.inner.func
    }

    pub fn base_priority(&self) -> i64 {
        self.inner.base_priority
    }

    /// Name under which a chain successor receives this task's result
    pub fn result_name(&self) -> &str {
        &self.inner.result_name
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.inner.execution_timeout
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn state(&self) -> TaskState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a state transition if the edge is valid; returns whether it was
    pub fn transition_to(&self, next: TaskState) -> bool {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.allows(next) {
            tracing::debug!(task = %self.inner.id, from = ?*state, to = ?next, "task transition");
            *state = next;
            true
        } else {
            false
        }
    }

    /// Declare that kwarg `name` is filled from `dep`'s result at dispatch.
    ///
    /// Only valid before submission; returns false once the task has left
    /// `Created`.
    pub fn add_arg_dep(&self, name: impl Into<String>, dep: TaskId) -> bool {
        if self.state() != TaskState::Created {
            return false;
        }
        self.inner
            .arg_deps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), dep);
        true
    }

    pub fn arg_deps(&self) -> HashMap<String, TaskId> {
        self.inner
            .arg_deps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Call arguments with dependency results substituted into kwargs
    pub fn input_with(&self, resolved: HashMap<String, Value>) -> crate::registry::TaskInput {
        let mut kwargs = self.inner.kwargs.clone();
        kwargs.extend(resolved);
        crate::registry::TaskInput::new(self.inner.args.clone(), kwargs)
    }

    /// Install the scheduler-side cancellation hook (once, at submission)
    pub fn attach_cancel_hook(&self, hook: Arc<dyn CancelHook>) {
        let _ = self.inner.cancel.set(hook);
    }

    /// Write the success outcome; scheduler/pool-manager side
    pub fn complete(&self, value: Value) -> bool {
        if self.transition_to(TaskState::Completed) {
            self.inner.slot.set(Ok(value))
        } else {
            false
        }
    }

    /// Write a failure outcome; `TaskError::Cancelled` lands in `Cancelled`
    pub fn fail(&self, error: TaskError) -> bool {
        let target = if matches!(error, TaskError::Cancelled) {
            TaskState::Cancelled
        } else {
            TaskState::Failed
        };
        if self.transition_to(target) {
            self.inner.slot.set(Err(error))
        } else {
            false
        }
    }

    /// Request cancellation.
    ///
    /// Before submission this resolves immediately. After submission the
    /// request is forwarded to the scheduler, which dequeues a queued task
    /// synchronously or signals the owning worker for a running one; the
    /// terminal state lands once the worker acknowledges or is reaped.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        match self.inner.cancel.get() {
            Some(hook) => hook.request_cancel(&self.inner.id),
            None => {
                self.fail(TaskError::Cancelled);
            }
        }
    }

    /// Outcome if already terminal, without waiting
    pub fn try_result(&self) -> Option<Result<Value, TaskError>> {
        self.inner.slot.peek()
    }

    /// Wait for the task to reach a terminal state and return its outcome.
    ///
    /// An expired `timeout` yields [`TaskError::GetTimeout`] without
    /// affecting the task itself.
    pub async fn get(&self, timeout: Option<Duration>) -> Result<Value, TaskError> {
        match timeout {
            None => self.inner.slot.wait().await,
            Some(limit) => match tokio::time::timeout(limit, self.inner.slot.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TaskError::GetTimeout),
            },
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("func", &self.inner.func)
            .field("state", &self.state())
            .field("priority", &self.inner.base_priority)
            .finish()
    }
}

/// Builder for [`Task`]
pub struct TaskBuilder {
    id: Option<TaskId>,
    name: String,
    func: String,
    args: Vec<Value>,
    kwargs: HashMap<String, Value>,
    result_name: String,
    base_priority: i64,
    execution_timeout: Option<Duration>,
}

impl TaskBuilder {
    /// Override the generated id
    pub fn id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.base_priority = priority;
        self
    }

    pub fn result_name(mut self, name: impl Into<String>) -> Self {
        self.result_name = name.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Per-task execution timeout from a duration string ("500ms", "2m", …)
    pub fn timeout_str(mut self, spec: &str) -> Result<Self, crate::error::ConfigError> {
        self.execution_timeout = Some(crate::duration::parse_timeout(spec)?);
        Ok(self)
    }

    pub fn build(self) -> Task {
        Task {
            inner: Arc::new(TaskInner {
                id: self.id.unwrap_or_else(TaskId::generate),
                name: self.name,
                func: self.func,
                args: self.args,
                kwargs: self.kwargs,
                result_name: self.result_name,
                base_priority: self.base_priority,
                execution_timeout: self.execution_timeout,
                created_at: Utc::now(),
                arg_deps: Mutex::new(HashMap::new()),
                state: Mutex::new(TaskState::Created),
                slot: ResultSlot::new(),
                cancel: OnceLock::new(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
