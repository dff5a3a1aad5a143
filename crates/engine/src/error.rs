// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine startup errors

use taskmill_core::ConfigError;
use thiserror::Error;

/// Errors raised by `Engine::init`; startup failures are loud, never deferred
#[derive(Debug, Error)]
pub enum InitError {
    #[error("an engine is already running in this process")]
    AlreadyRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
}
