// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol across the process-isolation boundary
//!
//! Newline-delimited JSON over the worker's stdio. Payloads carry only
//! `(task id, arguments or serialized outcome)` pairs; the parent-side
//! arena maps ids back to task handles, so no memory is shared across the
//! boundary.

use crate::error::TransportError;
use crate::registry::{TaskInput, TaskKind};
use crate::task::TaskId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parent → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Execute one task; the worker replies exactly once for it
    Run {
        task_id: TaskId,
        func: String,
        input: TaskInput,
        kind: TaskKind,
        /// Execution timeout in milliseconds, enforced worker-side for
        /// async callables (the parent's grace window backstops the rest)
        timeout_ms: Option<u64>,
    },
    /// Abandon the named task if it is still running
    Abort { task_id: TaskId },
    /// Exit the worker loop after the current task
    Shutdown,
}

/// Worker → parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// Sent once after startup, before any task is accepted
    Ready,
    Done { task_id: TaskId, result: Value },
    Failed { task_id: TaskId, error: String },
    TimedOut { task_id: TaskId },
    Aborted { task_id: TaskId },
}

impl WorkerReply {
    /// The task this reply resolves, if any
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            WorkerReply::Ready => None,
            WorkerReply::Done { task_id, .. }
            | WorkerReply::Failed { task_id, .. }
            | WorkerReply::TimedOut { task_id }
            | WorkerReply::Aborted { task_id } => Some(task_id),
        }
    }
}

/// Encode a message as one JSON line (newline included)
pub fn encode<T: Serialize>(message: &T) -> Result<String, TransportError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one JSON line
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, TransportError> {
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn encode_decode_roundtrip_request() {
        let mut kwargs = HashMap::new();
        kwargs.insert("scale".to_string(), json!(2));
        let request = WorkerRequest::Run {
            task_id: TaskId::from("t-1"),
            func: "math.add".to_string(),
            input: TaskInput::new(vec![json!(1), json!(2)], kwargs),
            kind: TaskKind::Sync,
            timeout_ms: Some(5_000),
        };

        let encoded = encode(&request).unwrap();
        assert!(encoded.ends_with('\n'));
        let decoded: WorkerRequest = decode(&encoded).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn encode_decode_roundtrip_replies() {
        let replies = vec![
            WorkerReply::Ready,
            WorkerReply::Done {
                task_id: TaskId::from("t-1"),
                result: json!({"n": 3}),
            },
            WorkerReply::Failed {
                task_id: TaskId::from("t-2"),
                error: "boom".to_string(),
            },
            WorkerReply::TimedOut {
                task_id: TaskId::from("t-3"),
            },
            WorkerReply::Aborted {
                task_id: TaskId::from("t-4"),
            },
        ];
        for reply in replies {
            let decoded: WorkerReply = decode(&encode(&reply).unwrap()).unwrap();
            assert_eq!(reply, decoded);
        }
    }

    #[test]
    fn one_message_per_line() {
        let a = encode(&WorkerRequest::Shutdown).unwrap();
        assert_eq!(a.matches('\n').count(), 1);
        // Embedded newlines in payloads stay escaped
        let b = encode(&WorkerReply::Failed {
            task_id: TaskId::from("t"),
            error: "line one\nline two".to_string(),
        })
        .unwrap();
        assert_eq!(b.matches('\n').count(), 1);
    }

    #[test]
    fn reply_task_id_helper() {
        assert_eq!(WorkerReply::Ready.task_id(), None);
        let reply = WorkerReply::TimedOut {
            task_id: TaskId::from("t-9"),
        };
        assert_eq!(reply.task_id(), Some(&TaskId::from("t-9")));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode::<WorkerReply>("not json\n").is_err());
    }
}
