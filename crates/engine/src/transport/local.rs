// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local transport: workers as in-process tasks
//!
//! Runs the same execution loop as the process transport, minus the
//! process boundary. Used by the test suite and by embedders that want
//! the engine without child processes (and without crash isolation).

use std::sync::Arc;

use async_trait::async_trait;
use taskmill_core::{TaskKind, TaskRegistry, TransportError, WorkerReply, WorkerRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::runner::worker_loop;
use crate::transport::{WorkerLink, WorkerReceiver, WorkerSender, WorkerTransport};

/// Spawns workers as tokio tasks sharing this process's registry
#[derive(Debug, Clone)]
pub struct LocalTransport {
    registry: Arc<TaskRegistry>,
}

impl LocalTransport {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

#[async_trait]
impl WorkerTransport for LocalTransport {
    async fn connect(&self, kind: TaskKind) -> Result<WorkerLink, TransportError> {
        let (request_tx, request_rx) = mpsc::channel::<WorkerRequest>(16);
        let (reply_tx, reply_rx) = mpsc::channel::<WorkerReply>(16);
        let handle = tokio::spawn(worker_loop(self.registry.clone(), request_rx, reply_tx));
        tracing::debug!(%kind, "spawned local worker");

        Ok(WorkerLink {
            sender: Box::new(LocalSender {
                requests: request_tx,
                handle,
            }),
            receiver: Box::new(LocalReceiver { replies: reply_rx }),
            pid: None,
        })
    }
}

struct LocalSender {
    requests: mpsc::Sender<WorkerRequest>,
    handle: JoinHandle<()>,
}

#[async_trait]
impl WorkerSender for LocalSender {
    async fn send(&mut self, request: WorkerRequest) -> Result<(), TransportError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn kill(&mut self) {
        // Aborting the loop drops its reply sender, which the receiving
        // side observes as a closed channel.
        self.handle.abort();
    }
}

struct LocalReceiver {
    replies: mpsc::Receiver<WorkerReply>,
}

#[async_trait]
impl WorkerReceiver for LocalReceiver {
    async fn recv(&mut self) -> Option<WorkerReply> {
        self.replies.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskmill_core::{TaskId, TaskInput};

    fn transport() -> LocalTransport {
        let mut registry = TaskRegistry::new();
        registry.register_sync("one", |_| Ok(json!(1)));
        LocalTransport::new(registry)
    }

    #[tokio::test]
    async fn connect_yields_a_ready_worker() {
        let mut link = transport().connect(TaskKind::Sync).await.unwrap();
        assert_eq!(link.receiver.recv().await, Some(WorkerReply::Ready));
        assert_eq!(link.pid, None);

        link.sender
            .send(WorkerRequest::Run {
                task_id: TaskId::from("t-1"),
                func: "one".to_string(),
                input: TaskInput::default(),
                kind: TaskKind::Sync,
                timeout_ms: None,
            })
            .await
            .unwrap();
        assert_eq!(
            link.receiver.recv().await,
            Some(WorkerReply::Done {
                task_id: TaskId::from("t-1"),
                result: json!(1),
            })
        );
    }

    #[tokio::test]
    async fn kill_closes_the_reply_channel() {
        let mut link = transport().connect(TaskKind::Sync).await.unwrap();
        assert_eq!(link.receiver.recv().await, Some(WorkerReply::Ready));

        link.sender.kill().await;
        assert_eq!(link.receiver.recv().await, None);
    }
}
