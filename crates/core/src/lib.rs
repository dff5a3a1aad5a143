// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taskmill-core: data model for the taskmill execution engine
//!
//! This crate provides:
//! - The task and chain data model (states, priorities, dependencies)
//! - The callable registry shared by submitter and worker processes
//! - The wire protocol spoken across the process-isolation boundary
//! - Configuration, duration parsing, and the error taxonomy

pub mod chain;
pub mod clock;
pub mod config;
pub mod duration;
pub mod error;
pub mod registry;
pub mod task;
pub mod wire;

// Re-exports
pub use chain::{TaskChain, CHAIN_MAX_LEN};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{
    BackpressurePolicy, EngineConfig, PoolConfig, ShutdownPolicy, DEFAULT_ABORT_GRACE,
};
pub use duration::parse_timeout;
pub use error::{ChainError, ConfigError, SubmitError, TaskError, TransportError};
pub use registry::{CallError, CallOutcome, Callable, TaskInput, TaskKind, TaskRegistry};
pub use task::{CancelHook, Task, TaskBuilder, TaskId, TaskState};
pub use wire::{WorkerReply, WorkerRequest};
