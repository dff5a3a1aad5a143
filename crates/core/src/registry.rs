// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Callable registry
//!
//! Closures do not cross a process boundary, so tasks reference their
//! callable by registry key. The submitting process and every worker
//! process install the same registry; the wire carries only the key and
//! the (JSON) arguments.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Which worker pool a callable executes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Sync,
    Async,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Sync => write!(f, "sync"),
            TaskKind::Async => write!(f, "async"),
        }
    }
}

/// Arguments delivered to a callable, dependencies already substituted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub args: Vec<Value>,
    pub kwargs: HashMap<String, Value>,
}

impl TaskInput {
    pub fn new(args: Vec<Value>, kwargs: HashMap<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Positional argument by index
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument by name
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

/// Error type user callables may return with `?`
pub type CallError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of one callable invocation
pub type CallOutcome = Result<Value, CallError>;

type SyncFn = Arc<dyn Fn(TaskInput) -> CallOutcome + Send + Sync>;
type AsyncFn =
    Arc<dyn Fn(TaskInput) -> Pin<Box<dyn Future<Output = CallOutcome> + Send>> + Send + Sync>;

/// A registered callable
#[derive(Clone)]
pub enum Callable {
    Sync(SyncFn),
    Async(AsyncFn),
}

impl Callable {
    pub fn kind(&self) -> TaskKind {
        match self {
            Callable::Sync(_) => TaskKind::Sync,
            Callable::Async(_) => TaskKind::Async,
        }
    }
}

/// Named callables shared by the submitter and worker processes
#[derive(Clone, Default)]
pub struct TaskRegistry {
    entries: HashMap<String, Callable>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous callable under `name`
    pub fn register_sync<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(TaskInput) -> CallOutcome + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Callable::Sync(Arc::new(f)));
        self
    }

    /// Register an asynchronous callable under `name`
    pub fn register_async<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(TaskInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallOutcome> + Send + 'static,
    {
        self.entries.insert(
            name.into(),
            Callable::Async(Arc::new(move |input| Box::pin(f(input)))),
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.entries.get(name)
    }

    /// Pool partition key for a registered callable
    pub fn kind_of(&self, name: &str) -> Option<TaskKind> {
        self.entries.get(name).map(Callable::kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
