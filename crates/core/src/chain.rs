// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Linear task chains
//!
//! A chain is an ordered composition of tasks: construction wires each
//! task's declared result into the next task's kwargs, inducing the
//! backward-pointing dependency edges the scheduler honors. Chains are
//! immutable once built and carry no state of their own; the terminal task
//! is the chain's result.

use crate::error::{ChainError, TaskError};
use crate::task::{Task, TaskState};
use serde_json::Value;
use std::time::Duration;

/// Hard upper bound on chain length, checked at construction
pub const CHAIN_MAX_LEN: usize = 15;

/// An ordered, length-bounded composition of tasks
#[derive(Debug, Clone)]
pub struct TaskChain {
    tasks: Vec<Task>,
}

impl TaskChain {
    /// Build a chain, wiring `tasks[i-1].result_name → tasks[i].arg_deps`
    pub fn new(tasks: Vec<Task>) -> Result<Self, ChainError> {
        if tasks.is_empty() {
            return Err(ChainError::Empty);
        }
        if tasks.len() > CHAIN_MAX_LEN {
            return Err(ChainError::TooLong(tasks.len()));
        }
        for window in tasks.windows(2) {
            let (prev, next) = (&window[0], &window[1]);
            if !next.add_arg_dep(prev.result_name(), prev.id().clone()) {
                return Err(ChainError::AlreadySubmitted(next.id().clone()));
            }
        }
        Ok(Self { tasks })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The task whose state and result define the chain's
    pub fn terminal(&self) -> &Task {
        &self.tasks[self.tasks.len() - 1]
    }

    /// Chain state, derived from the terminal task
    pub fn state(&self) -> TaskState {
        self.terminal().state()
    }

    /// Wait for the terminal task's result
    pub async fn get(&self, timeout: Option<Duration>) -> Result<Value, TaskError> {
        self.terminal().get(timeout).await
    }
}

#[cfg(test)]
#[path = "chain_tests.rs"]
mod tests;
