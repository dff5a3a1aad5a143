// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker transports
//!
//! The pool manager talks to workers through these seams. The production
//! transport spawns OS processes and speaks the wire protocol over their
//! stdio; the local transport runs the same worker loop on in-process
//! channels and doubles as the test double and an embedded execution mode.

mod local;
mod process;

pub use local::LocalTransport;
pub use process::ProcessTransport;

use async_trait::async_trait;
use taskmill_core::{TaskKind, TransportError, WorkerReply, WorkerRequest};

/// Writing half of a worker channel, plus the kill switch
#[async_trait]
pub trait WorkerSender: Send {
    async fn send(&mut self, request: WorkerRequest) -> Result<(), TransportError>;
    /// Force-terminate the worker; its receiving half closes as a result
    async fn kill(&mut self);
}

/// Reading half of a worker channel
#[async_trait]
pub trait WorkerReceiver: Send {
    /// Next reply; `None` once the worker is gone (exit, kill, or crash)
    async fn recv(&mut self) -> Option<WorkerReply>;
}

/// A connected worker: channel halves plus process identity
pub struct WorkerLink {
    pub sender: Box<dyn WorkerSender>,
    pub receiver: Box<dyn WorkerReceiver>,
    pub pid: Option<u32>,
}

/// Factory for worker connections, one per spawned worker
#[async_trait]
pub trait WorkerTransport: Send + Sync + 'static {
    async fn connect(&self, kind: TaskKind) -> Result<WorkerLink, TransportError>;
}
