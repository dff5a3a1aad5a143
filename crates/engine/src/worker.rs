// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parent-side worker records
//!
//! Each spawned worker is tracked by one `Worker` holding the sending half
//! of its channel and a small state machine:
//!
//! ```text
//! Idle ⇄ Busy → Stopped → Idle
//!   └──────┴───────┴──→ Terminated
//! ```
//!
//! `Stopped` means an abort is in flight: the worker was told to abandon
//! its task (timeout or cancellation) and the pool is waiting for the ack
//! before handing it new work. `Terminated` is absorbing; the record is
//! removed once its channel drains.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use taskmill_core::{TaskId, TaskKind};

use crate::transport::WorkerSender;

/// Worker identity, unique within one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    kind: TaskKind,
    seq: u64,
}

impl WorkerId {
    pub(crate) fn new(kind: TaskKind, seq: u64) -> Self {
        Self { kind, seq }
    }

    /// The pool this worker belongs to
    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.kind, self.seq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Stopped,
    Terminated,
}

impl WorkerState {
    /// Whether `self → next` is a legal transition
    pub fn allows(self, next: WorkerState) -> bool {
        use WorkerState::*;
        match (self, next) {
            (Idle, Busy) | (Busy, Idle) | (Busy, Stopped) | (Stopped, Idle) => true,
            (Terminated, _) => false,
            (_, Terminated) => true,
            _ => false,
        }
    }
}

/// Why a worker was told to abandon its task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Timeout,
    Cancel,
    Shutdown,
}

/// The task a busy worker is executing
#[derive(Debug, Clone)]
pub(crate) struct CurrentTask {
    pub task_id: TaskId,
    /// Dispatch attempts including this one; bounds crash requeues
    pub attempts: u32,
    pub timeout: Option<Duration>,
    /// Dependency results, kept for a potential crash requeue
    pub resolved: HashMap<String, Value>,
}

pub(crate) struct Worker {
    pub id: WorkerId,
    state: WorkerState,
    pub current: Option<CurrentTask>,
    pub stop_reason: Option<StopReason>,
    pub idle_since: Instant,
    pub sender: Box<dyn WorkerSender>,
    pub pid: Option<u32>,
}

impl Worker {
    pub fn new(id: WorkerId, sender: Box<dyn WorkerSender>, pid: Option<u32>, now: Instant) -> Self {
        Self {
            id,
            state: WorkerState::Idle,
            current: None,
            stop_reason: None,
            idle_since: now,
            sender,
            pid,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.idle_since)
    }

    /// Idle → Busy with `current` in hand
    pub fn assign(&mut self, current: CurrentTask) -> bool {
        if !self.state.allows(WorkerState::Busy) {
            return false;
        }
        self.state = WorkerState::Busy;
        self.current = Some(current);
        true
    }

    /// Busy → Idle after a reply resolved the current task
    pub fn finish(&mut self, now: Instant) -> Option<CurrentTask> {
        if !self.state.allows(WorkerState::Idle) {
            return None;
        }
        self.state = WorkerState::Idle;
        self.stop_reason = None;
        self.idle_since = now;
        self.current.take()
    }

    /// Busy → Stopped; an abort is now in flight for the current task
    pub fn stop(&mut self, reason: StopReason) -> bool {
        if self.state != WorkerState::Busy || !self.state.allows(WorkerState::Stopped) {
            return false;
        }
        self.state = WorkerState::Stopped;
        self.stop_reason = Some(reason);
        true
    }

    /// Stopped → Idle once the worker acked the abort
    pub fn ack_stop(&mut self, now: Instant) -> Option<(CurrentTask, StopReason)> {
        if self.state != WorkerState::Stopped {
            return None;
        }
        self.state = WorkerState::Idle;
        self.idle_since = now;
        let current = self.current.take()?;
        let reason = self.stop_reason.take()?;
        Some((current, reason))
    }

    /// Any state → Terminated; yields the task that was in flight, if any
    pub fn terminate(&mut self) -> Option<CurrentTask> {
        if self.state == WorkerState::Terminated {
            return None;
        }
        self.state = WorkerState::Terminated;
        self.current.take()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
