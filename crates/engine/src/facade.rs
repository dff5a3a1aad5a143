// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide convenience surface
//!
//! Thin wrappers over the global engine installed by `Engine::init`.
//! Applications that hold their own [`crate::Engine`] handle can call its
//! methods directly instead.

pub use crate::runner::worker_main;

use crate::engine::Engine;
use taskmill_core::{SubmitError, Task, TaskChain};

/// Submit one task to the global engine
pub async fn push_task(task: &Task) -> Result<(), SubmitError> {
    Engine::global()
        .ok_or(SubmitError::NotInitialized)?
        .submit_task(task)
        .await
}

/// Submit a chain to the global engine
pub async fn push_chain(chain: &TaskChain) -> Result<(), SubmitError> {
    Engine::global()
        .ok_or(SubmitError::NotInitialized)?
        .submit_chain(chain)
        .await
}
