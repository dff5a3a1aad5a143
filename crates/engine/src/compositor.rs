// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine loop
//!
//! One actor owns all mutable engine state: the scheduler, both worker
//! pools, and the parked-submission queue. Everything reaches it through
//! the event channel; worker replies are forwarded by per-worker reader
//! tasks, timers post their own expiry events. No locks, no shared state.
//!
//! Dispatch marks a task `Dispatched` then `Running` around the send;
//! resolution comes back as a worker reply (or a closed channel for a
//! crash) and lands in the task's result slot.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use taskmill_core::{
    BackpressurePolicy, CancelHook, Clock, EngineConfig, ShutdownPolicy, SubmitError, Task,
    TaskError, TaskId, TaskKind, TaskRegistry, TaskState, WorkerReply, WorkerRequest,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::cpu::CpuProbe;
use crate::pool::{ScaleDecision, WorkerPool};
use crate::scheduler::SchedState;
use crate::transport::{WorkerReceiver, WorkerTransport};
use crate::worker::{CurrentTask, StopReason, Worker, WorkerId, WorkerState};

/// Everything the engine loop reacts to
pub(crate) enum EngineEvent {
    Submit {
        tasks: Vec<Task>,
        reply: oneshot::Sender<Result<(), SubmitError>>,
    },
    Cancel {
        task: TaskId,
    },
    Reply {
        worker: WorkerId,
        reply: WorkerReply,
    },
    /// The worker's channel closed: clean exit, kill, or crash
    Closed {
        worker: WorkerId,
    },
    /// A dispatched task hit its execution timeout
    Deadline {
        worker: WorkerId,
        task: TaskId,
    },
    /// An aborted worker did not acknowledge within the grace window
    GraceExpired {
        worker: WorkerId,
        task: TaskId,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// A submission held back by `BackpressurePolicy::Block`
struct ParkedSubmit {
    tasks: Vec<Task>,
    meta: Vec<TaskMeta>,
    reply: oneshot::Sender<Result<(), SubmitError>>,
}

/// Validated per-task admission data: pool and dependency handles
struct TaskMeta {
    kind: TaskKind,
    deps: Vec<(String, Task)>,
}

pub(crate) struct Compositor<C: Clock> {
    config: EngineConfig,
    registry: Arc<TaskRegistry>,
    transport: Arc<dyn WorkerTransport>,
    clock: C,
    cpu: Box<dyn CpuProbe>,
    events: mpsc::UnboundedSender<EngineEvent>,
    inbox: mpsc::UnboundedReceiver<EngineEvent>,
    sched: SchedState,
    sync_pool: WorkerPool,
    async_pool: WorkerPool,
    parked: VecDeque<ParkedSubmit>,
    stopping: bool,
    shutdown_ack: Option<oneshot::Sender<()>>,
}

impl<C: Clock> Compositor<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        registry: Arc<TaskRegistry>,
        transport: Arc<dyn WorkerTransport>,
        cpu: Box<dyn CpuProbe>,
        clock: C,
        events: mpsc::UnboundedSender<EngineEvent>,
        inbox: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Self {
        let sched = SchedState::new(config.aging_increment);
        let sync_pool = WorkerPool::new(TaskKind::Sync, config.sync_pool.clone());
        let async_pool = WorkerPool::new(TaskKind::Async, config.async_pool.clone());
        Self {
            config,
            registry,
            transport,
            clock,
            cpu,
            events,
            inbox,
            sched,
            sync_pool,
            async_pool,
            parked: VecDeque::new(),
            stopping: false,
            shutdown_ack: None,
        }
    }

    pub async fn run(mut self) {
        for kind in [TaskKind::Sync, TaskKind::Async] {
            let min = self.config.pool(kind).min_workers;
            for _ in 0..min {
                self.spawn_worker(kind).await;
            }
        }

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick().await,
                event = self.inbox.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    None => break,
                },
            }
            if self.finished() {
                break;
            }
        }
        self.teardown().await;
    }

    async fn on_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Submit { tasks, reply } => self.on_submit(tasks, reply).await,
            EngineEvent::Cancel { task } => self.on_cancel(task).await,
            EngineEvent::Reply { worker, reply } => self.on_reply(worker, reply).await,
            EngineEvent::Closed { worker } => self.on_closed(worker).await,
            EngineEvent::Deadline { worker, task } => self.on_deadline(worker, task).await,
            EngineEvent::GraceExpired { worker, task } => self.on_grace_expired(worker, task).await,
            EngineEvent::Shutdown { ack } => self.begin_shutdown(ack).await,
        }
    }

    // ---- submission ----

    async fn on_submit(
        &mut self,
        tasks: Vec<Task>,
        reply: oneshot::Sender<Result<(), SubmitError>>,
    ) {
        if self.stopping {
            let _ = reply.send(Err(SubmitError::ShuttingDown));
            return;
        }
        let meta = match self.validate_batch(&tasks) {
            Ok(meta) => meta,
            Err(error) => {
                let _ = reply.send(Err(error));
                return;
            }
        };
        if let Err(error) = self.capacity_for(&meta) {
            match self.config.backpressure {
                BackpressurePolicy::FailFast => {
                    let _ = reply.send(Err(error));
                }
                BackpressurePolicy::Block => {
                    tracing::debug!(batch = tasks.len(), "backlog full, parking submission");
                    self.attach_hooks(&tasks);
                    self.parked.push_back(ParkedSubmit { tasks, meta, reply });
                }
            }
            return;
        }
        self.attach_hooks(&tasks);
        self.admit_batch(tasks, meta);
        let _ = reply.send(Ok(()));
        self.pump().await;
    }

    /// The whole batch admits or none of it does
    fn validate_batch(&self, tasks: &[Task]) -> Result<Vec<TaskMeta>, SubmitError> {
        let by_id: std::collections::HashMap<TaskId, Task> = tasks
            .iter()
            .map(|t| (t.id().clone(), t.clone()))
            .collect();
        let mut meta = Vec::with_capacity(tasks.len());
        for task in tasks {
            if task.state() != TaskState::Created {
                return Err(SubmitError::Rejected(task.state()));
            }
            let kind = self
                .registry
                .kind_of(task.func())
                .ok_or_else(|| SubmitError::UnknownFunction(task.func().to_string()))?;
            let mut deps = Vec::new();
            for (name, dep_id) in task.arg_deps() {
                let dep = by_id
                    .get(&dep_id)
                    .cloned()
                    .or_else(|| self.sched.task(&dep_id).cloned())
                    .ok_or(SubmitError::UnknownDependency(dep_id))?;
                deps.push((name, dep));
            }
            meta.push(TaskMeta { kind, deps });
        }
        Ok(meta)
    }

    /// Route later `Task::cancel` calls back into this loop.
    ///
    /// Hooks go on only once the batch is accepted; a rejected task keeps
    /// its immediate-fail cancellation path.
    fn attach_hooks(&self, tasks: &[Task]) {
        let hook: Arc<dyn CancelHook> = Arc::new(EventCancelHook {
            events: self.events.clone(),
        });
        for task in tasks {
            task.attach_cancel_hook(hook.clone());
        }
    }

    fn capacity_for(&self, meta: &[TaskMeta]) -> Result<(), SubmitError> {
        for kind in [TaskKind::Sync, TaskKind::Async] {
            let incoming = meta.iter().filter(|m| m.kind == kind).count();
            if incoming > 0 && self.sched.depth(kind) + incoming > self.config.max_backlog {
                return Err(SubmitError::Saturated { kind });
            }
        }
        Ok(())
    }

    fn admit_batch(&mut self, tasks: Vec<Task>, meta: Vec<TaskMeta>) {
        for (task, meta) in tasks.into_iter().zip(meta) {
            // Cancelled while parked; nothing to admit.
            if !task.transition_to(TaskState::Queued) {
                continue;
            }
            tracing::debug!(task = %task.id(), kind = %meta.kind, "task queued");
            self.sched.insert(task, meta.kind, meta.deps);
        }
    }

    // ---- cancellation ----

    async fn on_cancel(&mut self, task_id: TaskId) {
        let Some(task) = self.sched.task(&task_id).cloned() else {
            // Not admitted: either already terminal, or still parked.
            for parked in &self.parked {
                if let Some(task) = parked.tasks.iter().find(|t| *t.id() == task_id) {
                    task.fail(TaskError::Cancelled);
                    return;
                }
            }
            return;
        };
        match task.state() {
            TaskState::Queued => {
                if self.sched.remove_queued(&task_id) {
                    task.fail(TaskError::Cancelled);
                    self.sched.on_task_terminal(&task_id);
                    self.pump().await;
                }
            }
            TaskState::Dispatched | TaskState::Running => {
                let owner = self
                    .sync_pool
                    .worker_for_task(&task_id)
                    .copied()
                    .or_else(|| self.async_pool.worker_for_task(&task_id).copied());
                if let Some(worker_id) = owner {
                    self.abort_worker(worker_id, task_id, StopReason::Cancel).await;
                }
            }
            _ => {}
        }
    }

    async fn abort_worker(&mut self, worker_id: WorkerId, task_id: TaskId, reason: StopReason) {
        let grace = self.config.abort_grace;
        let events = self.events.clone();
        let Some(worker) = self.worker_mut(worker_id) else {
            return;
        };
        if worker.state() != WorkerState::Busy {
            return;
        }
        tracing::debug!(worker = %worker_id, task = %task_id, ?reason, "aborting worker");
        let _ = worker
            .sender
            .send(WorkerRequest::Abort {
                task_id: task_id.clone(),
            })
            .await;
        worker.stop(reason);
        arm_timer(
            &events,
            grace,
            EngineEvent::GraceExpired {
                worker: worker_id,
                task: task_id,
            },
        );
    }

    // ---- worker replies ----

    async fn on_reply(&mut self, worker_id: WorkerId, reply: WorkerReply) {
        match reply {
            WorkerReply::Ready => {
                tracing::debug!(worker = %worker_id, "worker ready");
            }
            WorkerReply::Done { task_id, result } => {
                self.resolve_reply(worker_id, task_id, Ok(result));
            }
            WorkerReply::Failed { task_id, error } => {
                self.resolve_reply(worker_id, task_id, Err(TaskError::Execution { message: error }));
            }
            WorkerReply::TimedOut { task_id } => {
                let timeout = self.current_timeout(worker_id);
                self.resolve_reply(worker_id, task_id, Err(TaskError::WorkerTimeout { timeout }));
            }
            WorkerReply::Aborted { task_id } => {
                self.on_aborted(worker_id, task_id);
            }
        }
        self.pump().await;
    }

    /// A `Done`/`Failed`/`TimedOut` reply resolves the worker's current
    /// task. Accepted from `Stopped` workers too: a task that finishes
    /// before the abort reaches it keeps its real outcome.
    fn resolve_reply(
        &mut self,
        worker_id: WorkerId,
        task_id: TaskId,
        outcome: Result<Value, TaskError>,
    ) {
        let now = self.clock.now();
        let Some(worker) = self.worker_mut(worker_id) else {
            return;
        };
        if !worker.current.as_ref().is_some_and(|c| c.task_id == task_id) {
            tracing::warn!(worker = %worker_id, task = %task_id, "stale reply ignored");
            return;
        }
        worker.finish(now);
        if let Some(task) = self.sched.task(&task_id).cloned() {
            match outcome {
                Ok(value) => {
                    task.complete(value);
                }
                Err(error) => {
                    task.fail(error);
                }
            }
        }
        self.sched.on_task_terminal(&task_id);
    }

    fn on_aborted(&mut self, worker_id: WorkerId, task_id: TaskId) {
        let now = self.clock.now();
        let Some(worker) = self.worker_mut(worker_id) else {
            return;
        };
        if worker.state() != WorkerState::Stopped
            || !worker.current.as_ref().is_some_and(|c| c.task_id == task_id)
        {
            tracing::warn!(worker = %worker_id, task = %task_id, "stale abort ack ignored");
            return;
        }
        let Some((current, reason)) = worker.ack_stop(now) else {
            return;
        };
        let error = match reason {
            StopReason::Timeout => TaskError::WorkerTimeout {
                timeout: current.timeout.unwrap_or_default(),
            },
            StopReason::Cancel | StopReason::Shutdown => TaskError::Cancelled,
        };
        if let Some(task) = self.sched.task(&task_id).cloned() {
            task.fail(error);
        }
        self.sched.on_task_terminal(&task_id);
    }

    fn current_timeout(&mut self, worker_id: WorkerId) -> Duration {
        self.worker_mut(worker_id)
            .and_then(|w| w.current.as_ref().and_then(|c| c.timeout))
            .unwrap_or_default()
    }

    // ---- worker lifecycle ----

    async fn on_closed(&mut self, worker_id: WorkerId) {
        let Some((state, current, reason, pid)) = self.worker_mut(worker_id).map(|worker| {
            let state = worker.state();
            let current = worker.terminate();
            let reason = worker.stop_reason.take();
            (state, current, reason, worker.pid)
        }) else {
            return;
        };
        self.pool_mut(worker_id.kind()).remove(&worker_id);
        tracing::debug!(worker = %worker_id, pid = ?pid, from = ?state, "worker channel closed");

        match (state, current) {
            // Reaped, or already resolved by the grace-expiry kill.
            (WorkerState::Terminated, _) => {}
            (WorkerState::Idle, _) => {}
            (WorkerState::Busy, Some(current)) => self.on_crash(worker_id, current),
            (WorkerState::Stopped, Some(current)) => {
                // Channel died while an abort was in flight.
                let error = match reason {
                    Some(StopReason::Timeout) => TaskError::WorkerTimeout {
                        timeout: current.timeout.unwrap_or_default(),
                    },
                    _ => TaskError::Cancelled,
                };
                if let Some(task) = self.sched.task(&current.task_id).cloned() {
                    task.fail(error);
                }
                self.sched.on_task_terminal(&current.task_id);
            }
            _ => {}
        }
        self.pump().await;
    }

    fn on_crash(&mut self, worker_id: WorkerId, current: CurrentTask) {
        let CurrentTask {
            task_id,
            attempts,
            resolved,
            ..
        } = current;
        tracing::warn!(worker = %worker_id, task = %task_id, attempts, "worker crashed");
        let Some(task) = self.sched.task(&task_id).cloned() else {
            return;
        };
        if attempts <= self.config.crash_retries {
            if task.transition_to(TaskState::Queued) {
                self.sched.requeue(task_id, worker_id.kind(), resolved, attempts);
            }
        } else {
            task.fail(TaskError::WorkerCrash { attempts });
            self.sched.on_task_terminal(&task_id);
        }
    }

    async fn on_deadline(&mut self, worker_id: WorkerId, task_id: TaskId) {
        let still_running = self.worker_mut(worker_id).is_some_and(|w| {
            w.state() == WorkerState::Busy
                && w.current.as_ref().is_some_and(|c| c.task_id == task_id)
        });
        if !still_running {
            return;
        }
        tracing::warn!(worker = %worker_id, task = %task_id, "execution timeout, aborting worker");
        self.abort_worker(worker_id, task_id, StopReason::Timeout).await;
    }

    async fn on_grace_expired(&mut self, worker_id: WorkerId, task_id: TaskId) {
        let resolved = {
            let Some(worker) = self.worker_mut(worker_id) else {
                return;
            };
            if worker.state() != WorkerState::Stopped
                || !worker.current.as_ref().is_some_and(|c| c.task_id == task_id)
            {
                return;
            }
            tracing::warn!(worker = %worker_id, task = %task_id, "abort unacknowledged, killing worker");
            worker.sender.kill().await;
            let current = worker.terminate();
            let reason = worker.stop_reason.take();
            (current, reason)
        };
        self.pool_mut(worker_id.kind()).remove(&worker_id);

        if let (Some(current), reason) = resolved {
            let error = match reason {
                Some(StopReason::Timeout) => TaskError::WorkerTimeout {
                    timeout: current.timeout.unwrap_or_default(),
                },
                _ => TaskError::Cancelled,
            };
            if let Some(task) = self.sched.task(&current.task_id).cloned() {
                task.fail(error);
            }
            self.sched.on_task_terminal(&current.task_id);
        }
        self.pump().await;
    }

    async fn spawn_worker(&mut self, kind: TaskKind) {
        match self.transport.connect(kind).await {
            Ok(link) => {
                let id = self.pool_mut(kind).allocate_id();
                let now = self.clock.now();
                tracing::info!(worker = %id, pid = ?link.pid, "worker spawned");
                self.pool_mut(kind)
                    .admit(Worker::new(id, link.sender, link.pid, now));
                self.spawn_reader(id, link.receiver);
            }
            Err(error) => {
                tracing::error!(%kind, %error, "worker spawn failed");
            }
        }
    }

    fn spawn_reader(&self, worker_id: WorkerId, mut receiver: Box<dyn WorkerReceiver>) {
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(reply) = receiver.recv().await {
                if events
                    .send(EngineEvent::Reply {
                        worker: worker_id,
                        reply,
                    })
                    .is_err()
                {
                    return;
                }
            }
            let _ = events.send(EngineEvent::Closed { worker: worker_id });
        });
    }

    async fn reap_worker(&mut self, worker_id: WorkerId) {
        let Some(worker) = self.worker_mut(worker_id) else {
            return;
        };
        if !worker.is_idle() {
            return;
        }
        tracing::debug!(worker = %worker_id, "reaping idle worker");
        let _ = worker.sender.send(WorkerRequest::Shutdown).await;
        // Record removal happens when the channel closes.
        worker.terminate();
    }

    // ---- tick ----

    async fn on_tick(&mut self) {
        let now = self.clock.now();
        self.sched.age_tick();
        let cpu = self.cpu.utilization();

        for kind in [TaskKind::Sync, TaskKind::Async] {
            let backlog = self.sched.backlog(kind);
            match self.pool_mut(kind).scale_decision(backlog, cpu, now) {
                ScaleDecision::Grow => self.spawn_worker(kind).await,
                ScaleDecision::Shrink(ids) => {
                    for id in ids {
                        self.reap_worker(id).await;
                    }
                }
                ScaleDecision::Hold => {}
            }
            for _ in 0..self.pool_mut(kind).deficit() {
                self.spawn_worker(kind).await;
            }
        }
        self.pump().await;
    }

    /// Dispatch ready work, admit parked submissions as room frees, repeat
    async fn pump(&mut self) {
        self.try_dispatch().await;
        while let Some(front) = self.parked.front() {
            if self.capacity_for(&front.meta).is_err() {
                break;
            }
            let Some(parked) = self.parked.pop_front() else {
                break;
            };
            self.admit_batch(parked.tasks, parked.meta);
            let _ = parked.reply.send(Ok(()));
        }
        self.try_dispatch().await;
    }

    async fn try_dispatch(&mut self) {
        for kind in [TaskKind::Sync, TaskKind::Async] {
            loop {
                if self.pool_mut(kind).idle_worker_mut().is_none() {
                    break;
                }
                let Some(entry) = self.sched.pop_ready(kind) else {
                    break;
                };
                let Some(task) = self.sched.task(&entry.task_id).cloned() else {
                    continue;
                };
                task.transition_to(TaskState::Dispatched);

                let timeout = task
                    .execution_timeout()
                    .or(self.config.default_execution_timeout);
                let attempts = entry.attempts + 1;
                let request = WorkerRequest::Run {
                    task_id: entry.task_id.clone(),
                    func: task.func().to_string(),
                    input: task.input_with(entry.resolved.clone()),
                    kind,
                    timeout_ms: timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
                };
                let events = self.events.clone();
                let grace = self.config.abort_grace;

                let sent = {
                    let Some(worker) = self.pool_mut(kind).idle_worker_mut() else {
                        self.sched
                            .requeue(entry.task_id, kind, entry.resolved, entry.attempts);
                        break;
                    };
                    match worker.sender.send(request).await {
                        Ok(()) => {
                            worker.assign(CurrentTask {
                                task_id: entry.task_id.clone(),
                                attempts,
                                timeout,
                                resolved: entry.resolved.clone(),
                            });
                            Ok(worker.id)
                        }
                        Err(_) => Err(worker.id),
                    }
                };
                match sent {
                    Ok(worker_id) => {
                        task.transition_to(TaskState::Running);
                        tracing::debug!(
                            task = %entry.task_id,
                            worker = %worker_id,
                            attempts,
                            "task dispatched"
                        );
                        if let Some(timeout) = timeout {
                            // The async pool enforces its own timeout; the
                            // parent deadline is a backstop there, but the
                            // only enforcement for blocking sync work.
                            let delay = match kind {
                                TaskKind::Sync => timeout,
                                TaskKind::Async => timeout + grace,
                            };
                            arm_timer(
                                &events,
                                delay,
                                EngineEvent::Deadline {
                                    worker: worker_id,
                                    task: entry.task_id.clone(),
                                },
                            );
                        }
                    }
                    Err(worker_id) => {
                        tracing::warn!(worker = %worker_id, "dispatch hit a dead worker channel");
                        task.transition_to(TaskState::Queued);
                        self.sched
                            .requeue(entry.task_id, kind, entry.resolved, entry.attempts);
                        if let Some(worker) = self.worker_mut(worker_id) {
                            worker.terminate();
                        }
                    }
                }
            }
        }
    }

    // ---- shutdown ----

    async fn begin_shutdown(&mut self, ack: oneshot::Sender<()>) {
        if self.stopping {
            // Second shutdown request; the dropped ack unblocks the caller.
            return;
        }
        self.stopping = true;
        self.shutdown_ack = Some(ack);
        tracing::info!(
            policy = ?self.config.shutdown,
            outstanding = self.sched.outstanding(),
            "engine shutdown requested"
        );
        for parked in self.parked.drain(..) {
            let _ = parked.reply.send(Err(SubmitError::ShuttingDown));
        }
        if self.config.shutdown == ShutdownPolicy::Cancel {
            for id in self.sched.waiting_ids() {
                if self.sched.remove_queued(&id) {
                    if let Some(task) = self.sched.task(&id).cloned() {
                        task.fail(TaskError::Cancelled);
                    }
                    self.sched.on_task_terminal(&id);
                }
            }
            let mut busy: Vec<(WorkerId, TaskId)> = self.sync_pool.busy_tasks();
            busy.extend(self.async_pool.busy_tasks());
            for (worker_id, task_id) in busy {
                self.abort_worker(worker_id, task_id, StopReason::Shutdown).await;
            }
        }
    }

    fn finished(&mut self) -> bool {
        if !self.stopping || self.sched.outstanding() > 0 {
            return false;
        }
        if let Some(ack) = self.shutdown_ack.take() {
            let _ = ack.send(());
        }
        true
    }

    async fn teardown(&mut self) {
        for kind in [TaskKind::Sync, TaskKind::Async] {
            for worker in self.pool_mut(kind).workers_mut() {
                let _ = worker.sender.send(WorkerRequest::Shutdown).await;
                worker.sender.kill().await;
            }
        }
        tracing::info!("engine stopped");
    }

    // ---- plumbing ----

    fn pool_mut(&mut self, kind: TaskKind) -> &mut WorkerPool {
        match kind {
            TaskKind::Sync => &mut self.sync_pool,
            TaskKind::Async => &mut self.async_pool,
        }
    }

    fn worker_mut(&mut self, id: WorkerId) -> Option<&mut Worker> {
        self.pool_mut(id.kind()).get_mut(&id)
    }
}

/// Routes `Task::cancel` calls back into the engine loop
struct EventCancelHook {
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl CancelHook for EventCancelHook {
    fn request_cancel(&self, id: &TaskId) {
        let _ = self.events.send(EngineEvent::Cancel { task: id.clone() });
    }
}

fn arm_timer(events: &mpsc::UnboundedSender<EngineEvent>, delay: Duration, event: EngineEvent) {
    let events = events.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = events.send(event);
    });
}
