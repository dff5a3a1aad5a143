// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use yare::parameterized;

fn task() -> Task {
    Task::builder("t", "noop").build()
}

#[test]
fn new_task_starts_created() {
    let task = task();
    assert_eq!(task.state(), TaskState::Created);
    assert!(task.try_result().is_none());
}

#[test]
fn builder_sets_spec_fields() {
    let task = Task::builder("sum", "math.add")
        .id("task-1")
        .arg(json!(1))
        .arg(json!(2))
        .kwarg("scale", json!(10))
        .priority(7)
        .result_name("sum")
        .timeout(Duration::from_secs(30))
        .build();

    assert_eq!(task.id(), &TaskId::from("task-1"));
    assert_eq!(task.name(), "sum");
    assert_eq!(task.func(), "math.add");
    assert_eq!(task.base_priority(), 7);
    assert_eq!(task.result_name(), "sum");
    assert_eq!(task.execution_timeout(), Some(Duration::from_secs(30)));
}

#[test]
fn timeout_str_rejects_garbage() {
    let result = Task::builder("t", "f").timeout_str("10 lightyears");
    assert!(result.is_err());
}

#[parameterized(
    created_to_queued = { TaskState::Created, TaskState::Queued, true },
    created_to_cancelled = { TaskState::Created, TaskState::Cancelled, true },
    created_to_running = { TaskState::Created, TaskState::Running, false },
    queued_to_dispatched = { TaskState::Queued, TaskState::Dispatched, true },
    queued_to_failed = { TaskState::Queued, TaskState::Failed, true },
    dispatched_to_running = { TaskState::Dispatched, TaskState::Running, true },
    dispatched_requeue = { TaskState::Dispatched, TaskState::Queued, true },
    running_to_completed = { TaskState::Running, TaskState::Completed, true },
    running_to_failed = { TaskState::Running, TaskState::Failed, true },
    running_requeue = { TaskState::Running, TaskState::Queued, true },
    running_to_cancelled = { TaskState::Running, TaskState::Cancelled, true },
    completed_is_absorbing = { TaskState::Completed, TaskState::Queued, false },
    failed_is_absorbing = { TaskState::Failed, TaskState::Running, false },
    cancelled_is_absorbing = { TaskState::Cancelled, TaskState::Queued, false },
    no_skip_to_running = { TaskState::Queued, TaskState::Running, false },
    no_skip_to_completed = { TaskState::Queued, TaskState::Completed, false },
)]
fn transition_table(from: TaskState, to: TaskState, allowed: bool) {
    assert_eq!(from.allows(to), allowed);
}

#[test]
fn terminal_predicate() {
    assert!(TaskState::Completed.is_terminal());
    assert!(TaskState::Failed.is_terminal());
    assert!(TaskState::Cancelled.is_terminal());
    assert!(!TaskState::Running.is_terminal());
    assert!(!TaskState::Queued.is_terminal());
}

#[test]
fn invalid_transition_is_rejected() {
    let task = task();
    assert!(!task.transition_to(TaskState::Running));
    assert_eq!(task.state(), TaskState::Created);
}

#[tokio::test]
async fn complete_populates_slot_once() {
    let task = task();
    task.transition_to(TaskState::Queued);
    task.transition_to(TaskState::Dispatched);
    task.transition_to(TaskState::Running);

    assert!(task.complete(json!(42)));
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.get(None).await.unwrap(), json!(42));

    // Second write does not land
    assert!(!task.complete(json!(99)));
    assert_eq!(task.get(None).await.unwrap(), json!(42));
}

#[tokio::test]
async fn fail_populates_exception_slot() {
    let task = task();
    task.transition_to(TaskState::Queued);

    assert!(task.fail(TaskError::Execution {
        message: "boom".to_string(),
    }));
    assert_eq!(task.state(), TaskState::Failed);
    let err = task.get(None).await.unwrap_err();
    assert!(matches!(err, TaskError::Execution { .. }));
}

#[tokio::test]
async fn cancelled_error_lands_in_cancelled_state() {
    let task = task();
    task.transition_to(TaskState::Queued);

    assert!(task.fail(TaskError::Cancelled));
    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(task.get(None).await.unwrap_err(), TaskError::Cancelled);
}

#[tokio::test]
async fn get_blocks_until_result_arrives() {
    let task = task();
    task.transition_to(TaskState::Queued);
    task.transition_to(TaskState::Dispatched);
    task.transition_to(TaskState::Running);

    let waiter = {
        let task = task.clone();
        tokio::spawn(async move { task.get(None).await })
    };

    tokio::task::yield_now().await;
    task.complete(json!("done"));

    assert_eq!(waiter.await.unwrap().unwrap(), json!("done"));
}

#[tokio::test]
async fn get_timeout_does_not_touch_task_state() {
    let task = task();
    task.transition_to(TaskState::Queued);

    let err = task.get(Some(Duration::from_millis(10))).await.unwrap_err();
    assert_eq!(err, TaskError::GetTimeout);
    assert_eq!(task.state(), TaskState::Queued);
    assert!(task.try_result().is_none());
}

#[tokio::test]
async fn cancel_before_submission_is_immediate() {
    let task = task();
    task.cancel();

    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(task.get(None).await.unwrap_err(), TaskError::Cancelled);

    // Idempotent
    task.cancel();
    assert_eq!(task.state(), TaskState::Cancelled);
}

#[test]
fn cancel_after_submission_routes_through_hook() {
    struct Recorder(Mutex<Vec<TaskId>>);
    impl CancelHook for Recorder {
        fn request_cancel(&self, id: &TaskId) {
            self.0
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(id.clone());
        }
    }

    let task = task();
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    task.attach_cancel_hook(recorder.clone());
    task.transition_to(TaskState::Queued);

    task.cancel();

    // The hook saw the request; state changes only once the engine acts
    assert_eq!(task.state(), TaskState::Queued);
    let seen = recorder.0.lock().unwrap();
    assert_eq!(seen.as_slice(), &[task.id().clone()]);
}

#[test]
fn arg_deps_seal_after_submission() {
    let task = task();
    assert!(task.add_arg_dep("input", TaskId::from("dep-1")));

    task.transition_to(TaskState::Queued);
    assert!(!task.add_arg_dep("late", TaskId::from("dep-2")));

    let deps = task.arg_deps();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps.get("input"), Some(&TaskId::from("dep-1")));
}

#[test]
fn input_with_substitutes_dependency_results() {
    let task = Task::builder("t", "f")
        .arg(json!(1))
        .kwarg("fixed", json!("x"))
        .build();

    let mut resolved = HashMap::new();
    resolved.insert("upstream".to_string(), json!([1, 2, 3]));
    let input = task.input_with(resolved);

    assert_eq!(input.arg(0), Some(&json!(1)));
    assert_eq!(input.kwarg("fixed"), Some(&json!("x")));
    assert_eq!(input.kwarg("upstream"), Some(&json!([1, 2, 3])));
}

#[test]
fn generated_ids_are_distinct() {
    assert_ne!(task().id(), task().id());
}
