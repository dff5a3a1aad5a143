// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taskmill-engine: scheduling and execution engine
//!
//! This crate provides:
//! - The worker process lifecycle (parent-side state machine, child-side
//!   execution loop, process/local transports)
//! - The load-adaptive pool manager that dispatches ready tasks and
//!   collects results across the process-isolation boundary
//! - The priority scheduler (aging, readiness, backpressure) and the
//!   engine facade that ties them together

mod compositor;
mod cpu;
mod engine;
mod error;
mod facade;
mod pool;
mod runner;
mod scheduler;
pub mod transport;
mod worker;

pub use cpu::{CpuProbe, FakeCpuProbe, SystemCpuProbe};
pub use engine::Engine;
pub use error::InitError;
pub use facade::{push_chain, push_task, worker_main};
pub use runner::WORKER_ENV;
pub use transport::{LocalTransport, ProcessTransport, WorkerTransport};
pub use worker::{StopReason, WorkerId, WorkerState};
