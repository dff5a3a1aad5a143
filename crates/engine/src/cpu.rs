// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CPU utilization sampling for the scaling policy

use std::sync::{Arc, Mutex};

/// Source of aggregate CPU utilization, sampled once per scheduler tick
pub trait CpuProbe: Send + 'static {
    /// Aggregate utilization across all cores, 0.0..=100.0
    fn utilization(&mut self) -> f32;
}

/// Real probe backed by the OS counters
pub struct SystemCpuProbe {
    system: sysinfo::System,
}

impl SystemCpuProbe {
    pub fn new() -> Self {
        Self {
            system: sysinfo::System::new(),
        }
    }
}

impl Default for SystemCpuProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuProbe for SystemCpuProbe {
    fn utilization(&mut self) -> f32 {
        // The first sample after startup reads 0.0; the tick cadence makes
        // the next one meaningful.
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage()
    }
}

/// Test probe with a settable reading
#[derive(Clone, Default)]
pub struct FakeCpuProbe {
    value: Arc<Mutex<f32>>,
}

impl FakeCpuProbe {
    pub fn new(value: f32) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
        }
    }

    pub fn set(&self, value: f32) {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }
}

impl CpuProbe for FakeCpuProbe {
    fn utilization(&mut self) -> f32 {
        *self.value.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_probe_returns_set_value() {
        let mut probe = FakeCpuProbe::new(42.5);
        assert_eq!(probe.utilization(), 42.5);

        probe.set(91.0);
        assert_eq!(probe.utilization(), 91.0);
    }

    #[test]
    fn fake_probe_clones_share_value() {
        let probe = FakeCpuProbe::new(10.0);
        let mut other = probe.clone();
        probe.set(55.0);
        assert_eq!(other.utilization(), 55.0);
    }

    #[test]
    fn system_probe_reading_is_in_range() {
        let mut probe = SystemCpuProbe::new();
        let reading = probe.utilization();
        assert!((0.0..=100.0).contains(&reading));
    }
}
