// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-side execution loop
//!
//! One loop serves both transports: the spawned child process bridges it
//! to stdio, the local transport feeds it in-process channels. The loop
//! runs one task at a time and replies exactly once per task. A panicking
//! callable takes the loop down; the parent observes the closed channel
//! and books it as a crash.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use taskmill_core::wire;
use taskmill_core::{CallOutcome, Callable, TaskId, TaskRegistry, WorkerReply, WorkerRequest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Environment variable marking a process as a spawned worker; its value
/// names the pool (`sync` or `async`)
pub const WORKER_ENV: &str = "TASKMILL_WORKER";

/// Call this first thing in `main`, with the same registry the engine is
/// initialized with. In a spawned worker process it runs the execution
/// loop and exits; in the parent it returns immediately.
pub fn worker_main(registry: TaskRegistry) {
    if std::env::var_os(WORKER_ENV).is_none() {
        return;
    }
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "worker runtime startup failed");
            std::process::exit(1);
        }
    };
    runtime.block_on(stdio_worker(Arc::new(registry)));
    std::process::exit(0);
}

/// Bridge the worker loop to the parent over this process's stdio
async fn stdio_worker(registry: Arc<TaskRegistry>) {
    let (request_tx, request_rx) = mpsc::channel::<WorkerRequest>(16);
    let (reply_tx, mut reply_rx) = mpsc::channel::<WorkerReply>(16);

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match wire::decode::<WorkerRequest>(&line) {
                Ok(request) => {
                    if request_tx.send(request).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "discarding malformed request line");
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(reply) = reply_rx.recv().await {
            let Ok(line) = wire::encode(&reply) else {
                continue;
            };
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });

    worker_loop(registry, request_rx, reply_tx).await;
    // The reply sender is gone; let the writer drain pending lines.
    reader.abort();
    let _ = writer.await;
}

/// Execute tasks from `requests` until shutdown, channel close, or crash
pub(crate) async fn worker_loop(
    registry: Arc<TaskRegistry>,
    mut requests: mpsc::Receiver<WorkerRequest>,
    replies: mpsc::Sender<WorkerReply>,
) {
    if replies.send(WorkerReply::Ready).await.is_err() {
        return;
    }
    while let Some(request) = requests.recv().await {
        let (task_id, func, input, timeout_ms) = match request {
            WorkerRequest::Shutdown => return,
            // Abort for a task that already finished; nothing to do.
            WorkerRequest::Abort { .. } => continue,
            WorkerRequest::Run {
                task_id,
                func,
                input,
                kind: _,
                timeout_ms,
            } => (task_id, func, input, timeout_ms),
        };
        tracing::debug!(task = %task_id, %func, "task started");

        let reply = match registry.get(&func) {
            None => Some(WorkerReply::Failed {
                task_id,
                error: format!("unknown function {func:?}"),
            }),
            Some(Callable::Sync(f)) => {
                let f = f.clone();
                match tokio::task::spawn_blocking(move || f(input)).await {
                    Ok(outcome) => Some(outcome_reply(task_id, outcome)),
                    Err(join_error) => {
                        tracing::error!(%join_error, %task_id, "sync callable panicked");
                        return;
                    }
                }
            }
            Some(Callable::Async(f)) => {
                drive_async(task_id, f(input), timeout_ms, &mut requests).await
            }
        };

        match reply {
            Some(reply) => {
                if replies.send(reply).await.is_err() {
                    return;
                }
            }
            // Shutdown arrived mid-task; the future was dropped.
            None => return,
        }
    }
}

/// Drive one async callable to completion, abort, or timeout.
///
/// Returns `None` when a shutdown (or closed channel) abandoned the task.
async fn drive_async(
    task_id: TaskId,
    mut fut: Pin<Box<dyn Future<Output = CallOutcome> + Send>>,
    timeout_ms: Option<u64>,
    requests: &mut mpsc::Receiver<WorkerRequest>,
) -> Option<WorkerReply> {
    let deadline = async {
        match timeout_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            outcome = &mut fut => {
                return Some(outcome_reply(task_id, outcome));
            }
            () = &mut deadline => {
                return Some(WorkerReply::TimedOut { task_id });
            }
            request = requests.recv() => match request {
                Some(WorkerRequest::Abort { task_id: target }) if target == task_id => {
                    return Some(WorkerReply::Aborted { task_id });
                }
                // Stale abort or a request the parent should not have
                // pipelined; keep driving the task.
                Some(WorkerRequest::Abort { .. }) | Some(WorkerRequest::Run { .. }) => {}
                Some(WorkerRequest::Shutdown) | None => return None,
            }
        }
    }
}

fn outcome_reply(task_id: TaskId, outcome: CallOutcome) -> WorkerReply {
    match outcome {
        Ok(result) => {
            tracing::debug!(task = %task_id, "task finished");
            WorkerReply::Done { task_id, result }
        }
        Err(error) => {
            let error = error.to_string();
            tracing::debug!(task = %task_id, %error, "task failed");
            WorkerReply::Failed { task_id, error }
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
