// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration surface
//!
//! All duration knobs accept human-readable strings in config files
//! ("100ms", "5m"); validation happens once, up front, so a malformed
//! value can never surface at dispatch time.

use crate::error::ConfigError;
use crate::registry::TaskKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long a stopped worker gets to acknowledge an abort before it is
/// force-terminated
pub const DEFAULT_ABORT_GRACE: Duration = Duration::from_millis(500);

/// Per-pool sizing and reclamation knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool never shrinks below this many workers
    pub min_workers: usize,
    /// Pool never grows beyond this many workers
    pub max_workers: usize,
    /// Idle workers past this age are reclaimed (down to `min_workers`)
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// No scale-up while aggregate CPU utilization exceeds this percentage
    pub cpu_high_watermark: f32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            idle_timeout: Duration::from_secs(300),
            cpu_high_watermark: 80.0,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_workers > self.max_workers || self.max_workers == 0 {
            return Err(ConfigError::InvalidPoolBounds {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        if self.cpu_high_watermark <= 0.0 || self.cpu_high_watermark > 100.0 {
            return Err(ConfigError::InvalidWatermark(self.cpu_high_watermark));
        }
        Ok(())
    }
}

/// What happens when a pool's backlog reaches the configured bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Submission waits until capacity frees (default)
    #[default]
    Block,
    /// Submission fails fast with `SubmitError::Saturated`
    FailFast,
}

/// What happens to queued work on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Run the queue to completion before stopping (default)
    #[default]
    Drain,
    /// Cancel queued tasks and abort running ones
    Cancel,
}

/// Global engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sync_pool: PoolConfig,
    pub async_pool: PoolConfig,
    /// Effective-priority bump applied to every queued task per tick
    pub aging_increment: i64,
    /// Scheduler tick: aging, readiness re-evaluation, scaling sample
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Per-pool backlog bound that engages backpressure
    pub max_backlog: usize,
    pub backpressure: BackpressurePolicy,
    /// Replacement attempts after a worker crash before the task fails
    pub crash_retries: u32,
    /// Grace window between abort and force-kill
    #[serde(with = "humantime_serde")]
    pub abort_grace: Duration,
    pub shutdown: ShutdownPolicy,
    /// Applied to tasks that do not carry their own execution timeout
    #[serde(with = "humantime_serde::option")]
    pub default_execution_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_pool: PoolConfig::default(),
            async_pool: PoolConfig::default(),
            aging_increment: 1,
            tick_interval: Duration::from_millis(100),
            max_backlog: 256,
            backpressure: BackpressurePolicy::default(),
            crash_retries: 1,
            abort_grace: DEFAULT_ABORT_GRACE,
            shutdown: ShutdownPolicy::default(),
            default_execution_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML document and validate
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Lower bounds and short intervals suitable for tests
    pub fn for_testing() -> Self {
        Self {
            sync_pool: PoolConfig {
                min_workers: 1,
                max_workers: 2,
                idle_timeout: Duration::from_millis(200),
                cpu_high_watermark: 90.0,
            },
            async_pool: PoolConfig {
                min_workers: 1,
                max_workers: 2,
                idle_timeout: Duration::from_millis(200),
                cpu_high_watermark: 90.0,
            },
            tick_interval: Duration::from_millis(10),
            abort_grace: Duration::from_millis(50),
            max_backlog: 16,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync_pool.validate()?;
        self.async_pool.validate()?;
        Ok(())
    }

    /// Pool configuration for a partition key
    pub fn pool(&self, kind: TaskKind) -> &PoolConfig {
        match kind {
            TaskKind::Sync => &self.sync_pool,
            TaskKind::Async => &self.async_pool,
        }
    }
}
