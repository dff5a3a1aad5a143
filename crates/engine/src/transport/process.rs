// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process transport: one OS process per worker
//!
//! Workers are re-executions of the current binary with the worker
//! environment variable set; `worker_main` routes them into the execution
//! loop. Requests go down the child's stdin, replies come back on its
//! stdout, one JSON line each way. The child's stderr stays attached to
//! the parent's so panics land in the parent's logs.

use std::process::Stdio;

use async_trait::async_trait;
use taskmill_core::wire;
use taskmill_core::{TaskKind, TransportError, WorkerReply, WorkerRequest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::runner::WORKER_ENV;
use crate::transport::{WorkerLink, WorkerReceiver, WorkerSender, WorkerTransport};

/// Spawns worker processes by re-executing the current binary
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTransport;

impl ProcessTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerTransport for ProcessTransport {
    async fn connect(&self, kind: TaskKind) -> Result<WorkerLink, TransportError> {
        let exe = std::env::current_exe().map_err(TransportError::Spawn)?;
        let mut child = Command::new(exe)
            .env(WORKER_ENV, kind.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(TransportError::Spawn)?;

        let stdin = child.stdin.take().ok_or(TransportError::Closed)?;
        let stdout = child.stdout.take().ok_or(TransportError::Closed)?;
        let pid = child.id();
        tracing::debug!(%kind, pid, "spawned worker process");

        Ok(WorkerLink {
            sender: Box::new(ProcessSender {
                stdin: Some(stdin),
                child,
            }),
            receiver: Box::new(ProcessReceiver {
                lines: BufReader::new(stdout).lines(),
            }),
            pid,
        })
    }
}

struct ProcessSender {
    stdin: Option<ChildStdin>,
    child: Child,
}

#[async_trait]
impl WorkerSender for ProcessSender {
    async fn send(&mut self, request: WorkerRequest) -> Result<(), TransportError> {
        let line = wire::encode(&request)?;
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn kill(&mut self) {
        // Closing stdin first gives a healthy child a clean exit path.
        self.stdin.take();
        if let Err(error) = self.child.start_kill() {
            tracing::debug!(%error, "worker kill raced with exit");
        }
        // Reap, or the child lingers as a zombie.
        let _ = self.child.wait().await;
    }
}

struct ProcessReceiver {
    lines: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl WorkerReceiver for ProcessReceiver {
    async fn recv(&mut self) -> Option<WorkerReply> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => match wire::decode(&line) {
                    Ok(reply) => return Some(reply),
                    Err(error) => {
                        tracing::warn!(%error, "discarding malformed reply line");
                    }
                },
                Ok(None) | Err(_) => return None,
            }
        }
    }
}
