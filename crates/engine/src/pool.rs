// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-pool worker bookkeeping and the scaling policy
//!
//! Each engine runs two pools (sync and async), sized between the
//! configured min and max. Scaling is decided once per tick:
//!
//! - grow by one when ready work is waiting, the pool is below max, and
//!   CPU utilization is under the high watermark
//! - reap idle workers past the idle timeout, and every idle worker while
//!   CPU is over the watermark, never dropping below min

use std::time::Instant;

use taskmill_core::{PoolConfig, TaskId, TaskKind};

use crate::worker::{Worker, WorkerId, WorkerState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScaleDecision {
    Grow,
    Shrink(Vec<WorkerId>),
    Hold,
}

pub(crate) struct WorkerPool {
    kind: TaskKind,
    config: PoolConfig,
    workers: Vec<Worker>,
    next_seq: u64,
}

impl WorkerPool {
    pub fn new(kind: TaskKind, config: PoolConfig) -> Self {
        Self {
            kind,
            config,
            workers: Vec::new(),
            next_seq: 0,
        }
    }

    /// Live workers, terminated ones pending removal excluded
    pub fn size(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.state() != WorkerState::Terminated)
            .count()
    }

    pub fn allocate_id(&mut self) -> WorkerId {
        self.next_seq += 1;
        WorkerId::new(self.kind, self.next_seq)
    }

    pub fn admit(&mut self, worker: Worker) {
        self.workers.push(worker);
    }

    pub fn get_mut(&mut self, id: &WorkerId) -> Option<&mut Worker> {
        self.workers.iter_mut().find(|w| w.id == *id)
    }

    pub fn idle_worker_mut(&mut self) -> Option<&mut Worker> {
        self.workers.iter_mut().find(|w| w.is_idle())
    }

    /// The non-terminated worker currently holding `task_id`, if any
    pub fn worker_for_task(&self, task_id: &TaskId) -> Option<&WorkerId> {
        self.workers
            .iter()
            .filter(|w| w.state() != WorkerState::Terminated)
            .find(|w| {
                w.current
                    .as_ref()
                    .is_some_and(|c| c.task_id == *task_id)
            })
            .map(|w| &w.id)
    }

    pub fn remove(&mut self, id: &WorkerId) -> Option<Worker> {
        let index = self.workers.iter().position(|w| w.id == *id)?;
        Some(self.workers.remove(index))
    }

    pub fn workers_mut(&mut self) -> impl Iterator<Item = &mut Worker> {
        self.workers.iter_mut()
    }

    /// Busy workers and the tasks they hold
    pub fn busy_tasks(&self) -> Vec<(WorkerId, TaskId)> {
        self.workers
            .iter()
            .filter(|w| w.state() == WorkerState::Busy)
            .filter_map(|w| w.current.as_ref().map(|c| (w.id, c.task_id.clone())))
            .collect()
    }

    /// Workers the pool is short of its configured minimum
    pub fn deficit(&self) -> usize {
        self.config.min_workers.saturating_sub(self.size())
    }

    /// One scaling step for this tick
    pub fn scale_decision(&self, backlog: usize, cpu: f32, now: Instant) -> ScaleDecision {
        let size = self.size();
        if backlog > 0 && size < self.config.max_workers && cpu < self.config.cpu_high_watermark {
            return ScaleDecision::Grow;
        }

        let pressured = cpu > self.config.cpu_high_watermark;
        let mut spare = size.saturating_sub(self.config.min_workers);
        let mut reap = Vec::new();
        for worker in &self.workers {
            if spare == 0 {
                break;
            }
            if !worker.is_idle() {
                continue;
            }
            if pressured || worker.idle_for(now) >= self.config.idle_timeout {
                reap.push(worker.id);
                spare -= 1;
            }
        }
        if reap.is_empty() {
            ScaleDecision::Hold
        } else {
            ScaleDecision::Shrink(reap)
        }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
