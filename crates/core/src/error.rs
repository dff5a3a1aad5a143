// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the engine
//!
//! Per-task failures ([`TaskError`]) are contained at the task boundary and
//! surfaced only through `Task::get`; they never become control-flow errors
//! inside the scheduler or pool manager.

use crate::registry::TaskKind;
use crate::task::{TaskId, TaskState};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Terminal failure of a single task, observed via `Task::get`
///
/// Cloneable because a single failure fans out to every dependent task and
/// to every caller holding the handle.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TaskError {
    /// A dependency finished in a failed or cancelled state; this task was
    /// never dispatched.
    #[error("dependency {dep} unresolvable: {detail}")]
    DependencyResolution { dep: TaskId, detail: String },
    /// The user callable returned an error (or panicked inside a worker).
    #[error("task execution failed: {message}")]
    Execution { message: String },
    /// Execution exceeded the configured timeout and the worker was stopped.
    #[error("task exceeded execution timeout of {timeout:?}")]
    WorkerTimeout { timeout: Duration },
    /// The worker process died mid-task and the retry budget is exhausted.
    #[error("worker crashed while running task (after {attempts} attempt(s))")]
    WorkerCrash { attempts: u32 },
    /// The task was cancelled before producing a result.
    #[error("task cancelled")]
    Cancelled,
    /// The caller-side wait on `get` timed out. The task itself is
    /// unaffected and may still complete.
    #[error("timed out waiting for task result")]
    GetTimeout,
}

/// Chain construction failures, raised before anything reaches the scheduler
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("task chain too long: {0} tasks (maximum {max})", max = crate::chain::CHAIN_MAX_LEN)]
    TooLong(usize),
    #[error("task chain must contain at least one task")]
    Empty,
    #[error("task {0} was already submitted; chains link unsubmitted tasks only")]
    AlreadySubmitted(TaskId),
}

/// Submission failures, returned synchronously from `submit`/`push`
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    ChainTooLong(#[from] ChainError),
    #[error("no callable registered under {0:?}")]
    UnknownFunction(String),
    #[error("dependency {0} is not tracked by the scheduler")]
    UnknownDependency(TaskId),
    #[error("{kind:?} pool saturated: backlog at configured bound")]
    Saturated { kind: TaskKind },
    #[error("scheduler is shutting down")]
    ShuttingDown,
    #[error("engine not initialized; call Engine::init first")]
    NotInitialized,
    #[error("task is not submittable in state {0:?}")]
    Rejected(TaskState),
}

/// Configuration-time failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },
    #[error("invalid pool bounds: min {min} > max {max}")]
    InvalidPoolBounds { min: usize, max: usize },
    #[error("cpu watermark must be within (0, 100], got {0}")]
    InvalidWatermark(f32),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

/// Failures at the process-isolation boundary
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(std::io::Error),
    #[error("worker channel i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker protocol codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("worker channel closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_messages_are_stable() {
        let err = TaskError::WorkerCrash { attempts: 2 };
        assert_eq!(
            err.to_string(),
            "worker crashed while running task (after 2 attempt(s))"
        );

        let err = TaskError::DependencyResolution {
            dep: TaskId::from("t-1"),
            detail: "failed".to_string(),
        };
        assert!(err.to_string().contains("t-1"));
    }

    #[test]
    fn chain_error_reports_limit() {
        let err = ChainError::TooLong(16);
        assert!(err.to_string().contains("16"));
        assert!(err.to_string().contains("15"));
    }

    #[test]
    fn task_error_serializes_across_the_wire() {
        let err = TaskError::Execution {
            message: "boom".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: TaskError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
