// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine handle
//!
//! `Engine::init` starts the process-wide engine backed by spawned worker
//! processes and installs it as the global instance the [`crate::facade`]
//! functions reach. `Engine::start` builds a free-standing engine over any
//! transport, used by embedders and the test suite; it does not touch the
//! global slot.

use std::sync::{Arc, Mutex, OnceLock};

use taskmill_core::{EngineConfig, SubmitError, SystemClock, Task, TaskChain, TaskRegistry};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::compositor::{Compositor, EngineEvent};
use crate::cpu::{CpuProbe, SystemCpuProbe};
use crate::error::InitError;
use crate::transport::{ProcessTransport, WorkerTransport};

static GLOBAL: OnceLock<Mutex<Option<Engine>>> = OnceLock::new();

fn global_slot() -> &'static Mutex<Option<Engine>> {
    GLOBAL.get_or_init(|| Mutex::new(None))
}

/// Handle to a running engine; cloning shares the same instance
#[derive(Clone)]
pub struct Engine {
    events: mpsc::UnboundedSender<EngineEvent>,
    loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Engine {
    /// Start the process-wide engine and install it as the global
    /// instance. At most one engine runs per process; a second call fails
    /// with [`InitError::AlreadyRunning`] until the first is shut down.
    ///
    /// Must be called from within a tokio runtime. Pair with a
    /// [`crate::worker_main`] call at the top of `main`, passing the same
    /// registry, so spawned worker processes find their callables.
    pub fn init(registry: TaskRegistry, config: EngineConfig) -> Result<Engine, InitError> {
        let mut slot = global_slot().lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(InitError::AlreadyRunning);
        }
        let engine = Engine::start(
            registry,
            config,
            Arc::new(ProcessTransport::new()),
            Box::new(SystemCpuProbe::new()),
        )?;
        *slot = Some(engine.clone());
        Ok(engine)
    }

    /// Start a free-standing engine over the given transport.
    ///
    /// Does not register globally; the caller owns the handle.
    pub fn start(
        registry: TaskRegistry,
        config: EngineConfig,
        transport: Arc<dyn WorkerTransport>,
        cpu: Box<dyn CpuProbe>,
    ) -> Result<Engine, InitError> {
        config.validate()?;
        let (events, inbox) = mpsc::unbounded_channel();
        let compositor = Compositor::new(
            config,
            Arc::new(registry),
            transport,
            cpu,
            SystemClock,
            events.clone(),
            inbox,
        );
        let handle = tokio::spawn(compositor.run());
        Ok(Engine {
            events,
            loop_handle: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// The global engine, if one is running
    pub fn global() -> Option<Engine> {
        global_slot()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Submit one task. Resolves once the task is admitted to the queue
    /// (or immediately with the rejection reason).
    pub async fn submit_task(&self, task: &Task) -> Result<(), SubmitError> {
        self.submit(vec![task.clone()]).await
    }

    /// Submit a chain atomically: either every link is admitted or none.
    pub async fn submit_chain(&self, chain: &TaskChain) -> Result<(), SubmitError> {
        self.submit(chain.tasks().to_vec()).await
    }

    async fn submit(&self, tasks: Vec<Task>) -> Result<(), SubmitError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.events
            .send(EngineEvent::Submit {
                tasks,
                reply: reply_tx,
            })
            .map_err(|_| SubmitError::ShuttingDown)?;
        reply_rx.await.map_err(|_| SubmitError::ShuttingDown)?
    }

    /// Stop the engine per its shutdown policy and wait for the loop to
    /// exit. Clears the global slot if this engine occupies it.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .events
            .send(EngineEvent::Shutdown { ack: ack_tx })
            .is_ok()
        {
            let _ = ack_rx.await;
        }
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let mut slot = global_slot().lock().unwrap_or_else(|e| e.into_inner());
        if slot
            .as_ref()
            .is_some_and(|g| g.events.same_channel(&self.events))
        {
            *slot = None;
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
