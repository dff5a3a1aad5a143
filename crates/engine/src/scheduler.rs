// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Priority scheduling state
//!
//! Two collections per engine: a ready queue sorted by effective priority
//! (descending, submission order breaking ties) and a pending set of tasks
//! whose dependencies have not resolved yet. The arena maps every
//! non-terminal task id back to its handle.
//!
//! Aging bumps the effective priority of every ready entry each tick, so a
//! low-priority task waits at most
//! `(max_priority - its_priority) / aging_increment` ticks behind later
//! high-priority arrivals.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde_json::Value;
use taskmill_core::{Task, TaskError, TaskId, TaskKind};

/// One ready-to-dispatch task
#[derive(Debug, Clone)]
pub(crate) struct QueuedEntry {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub effective_priority: i64,
    pub seq: u64,
    /// Dependency results keyed by the kwarg name they fill
    pub resolved: HashMap<String, Value>,
    /// Dispatch attempts so far; non-zero after a crash requeue
    pub attempts: u32,
}

struct PendingEntry {
    task_id: TaskId,
    kind: TaskKind,
    deps: Vec<(String, Task)>,
}

enum DepCheck {
    Wait,
    Ready(HashMap<String, Value>),
    Failed(TaskError),
}

pub(crate) struct SchedState {
    ready: Vec<QueuedEntry>,
    pending: Vec<PendingEntry>,
    arena: HashMap<TaskId, Task>,
    next_seq: u64,
    aging_increment: i64,
}

impl SchedState {
    pub fn new(aging_increment: i64) -> Self {
        Self {
            ready: Vec::new(),
            pending: Vec::new(),
            arena: HashMap::new(),
            next_seq: 0,
            aging_increment,
        }
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.arena.get(id)
    }

    /// Ready entries for one pool; drives dispatch and scale-up decisions
    pub fn backlog(&self, kind: TaskKind) -> usize {
        self.ready.iter().filter(|e| e.kind == kind).count()
    }

    /// Ready plus pending entries for one pool; drives saturation checks
    pub fn depth(&self, kind: TaskKind) -> usize {
        self.backlog(kind) + self.pending.iter().filter(|e| e.kind == kind).count()
    }

    /// Non-terminal tasks the engine still owes an outcome
    pub fn outstanding(&self) -> usize {
        self.arena.len()
    }

    /// Every task still waiting in the ready queue or the pending set
    pub fn waiting_ids(&self) -> Vec<TaskId> {
        self.ready
            .iter()
            .map(|e| e.task_id.clone())
            .chain(self.pending.iter().map(|e| e.task_id.clone()))
            .collect()
    }

    /// Admit a task whose dependencies (if any) are the given handles.
    ///
    /// Settles immediately when every dependency is already terminal.
    pub fn insert(&mut self, task: Task, kind: TaskKind, deps: Vec<(String, Task)>) {
        let task_id = task.id().clone();
        self.arena.insert(task_id.clone(), task);
        self.pending.push(PendingEntry {
            task_id,
            kind,
            deps,
        });
        let index = self.pending.len() - 1;
        match self.check_deps(index) {
            DepCheck::Wait => {}
            DepCheck::Ready(resolved) => {
                let entry = self.pending.remove(index);
                self.push_ready(entry.task_id, entry.kind, resolved, 0);
            }
            DepCheck::Failed(error) => {
                let entry = self.pending.remove(index);
                if let Some(task) = self.arena.get(&entry.task_id) {
                    task.fail(error);
                }
                self.on_task_terminal(&entry.task_id);
            }
        }
    }

    /// Highest-priority ready entry for `kind`, if any
    pub fn pop_ready(&mut self, kind: TaskKind) -> Option<QueuedEntry> {
        let index = self.ready.iter().position(|e| e.kind == kind)?;
        Some(self.ready.remove(index))
    }

    /// Put a crashed task back in line at its base priority
    pub fn requeue(
        &mut self,
        task_id: TaskId,
        kind: TaskKind,
        resolved: HashMap<String, Value>,
        attempts: u32,
    ) {
        self.push_ready(task_id, kind, resolved, attempts);
    }

    /// Drop a queued or pending entry; false when the task is not waiting
    pub fn remove_queued(&mut self, id: &TaskId) -> bool {
        if let Some(index) = self.ready.iter().position(|e| e.task_id == *id) {
            self.ready.remove(index);
            return true;
        }
        if let Some(index) = self.pending.iter().position(|e| e.task_id == *id) {
            self.pending.remove(index);
            return true;
        }
        false
    }

    /// Bump every ready entry by the aging increment.
    ///
    /// A uniform bump never reorders existing entries, so the queue stays
    /// sorted; what changes is where entries enqueued later slot in.
    pub fn age_tick(&mut self) {
        if self.aging_increment == 0 {
            return;
        }
        for entry in &mut self.ready {
            entry.effective_priority = entry
                .effective_priority
                .saturating_add(self.aging_increment);
        }
    }

    /// Settle the fallout of a task reaching a terminal state: release or
    /// fail dependents (transitively) and retire arena entries.
    pub fn on_task_terminal(&mut self, id: &TaskId) {
        let mut worklist = vec![id.clone()];
        while let Some(done) = worklist.pop() {
            self.arena.remove(&done);
            let mut index = 0;
            while index < self.pending.len() {
                let touched = self.pending[index]
                    .deps
                    .iter()
                    .any(|(_, dep)| *dep.id() == done);
                if !touched {
                    index += 1;
                    continue;
                }
                match self.check_deps(index) {
                    DepCheck::Wait => index += 1,
                    DepCheck::Ready(resolved) => {
                        let entry = self.pending.remove(index);
                        self.push_ready(entry.task_id, entry.kind, resolved, 0);
                    }
                    DepCheck::Failed(error) => {
                        let entry = self.pending.remove(index);
                        if let Some(task) = self.arena.get(&entry.task_id) {
                            tracing::debug!(task = %entry.task_id, %error, "failing dependent");
                            task.fail(error);
                        }
                        worklist.push(entry.task_id);
                    }
                }
            }
        }
    }

    fn push_ready(
        &mut self,
        task_id: TaskId,
        kind: TaskKind,
        resolved: HashMap<String, Value>,
        attempts: u32,
    ) {
        let effective_priority = self
            .arena
            .get(&task_id)
            .map(Task::base_priority)
            .unwrap_or(0);
        self.ready.push(QueuedEntry {
            task_id,
            kind,
            effective_priority,
            seq: self.next_seq,
            resolved,
            attempts,
        });
        self.next_seq += 1;
        self.ready
            .sort_by_key(|e| (Reverse(e.effective_priority), e.seq));
    }

    fn check_deps(&self, index: usize) -> DepCheck {
        let entry = &self.pending[index];
        let mut resolved = HashMap::new();
        for (name, dep) in &entry.deps {
            match dep.try_result() {
                Some(Ok(value)) => {
                    resolved.insert(name.clone(), value);
                }
                Some(Err(error)) => {
                    return DepCheck::Failed(TaskError::DependencyResolution {
                        dep: dep.id().clone(),
                        detail: error.to_string(),
                    });
                }
                None => return DepCheck::Wait,
            }
        }
        DepCheck::Ready(resolved)
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
