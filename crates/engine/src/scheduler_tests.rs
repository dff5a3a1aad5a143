// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use serde_json::json;
use taskmill_core::TaskState;

fn queued_task(id: &str, priority: i64) -> Task {
    let task = Task::builder(id, "noop").id(id).priority(priority).build();
    assert!(task.transition_to(TaskState::Queued));
    task
}

fn run_and_complete(task: &Task, value: Value) {
    assert!(task.transition_to(TaskState::Dispatched));
    assert!(task.transition_to(TaskState::Running));
    assert!(task.complete(value));
}

fn insert_ready(sched: &mut SchedState, id: &str, priority: i64, kind: TaskKind) {
    sched.insert(queued_task(id, priority), kind, vec![]);
}

#[test]
fn pop_orders_by_priority_then_submission() {
    let mut sched = SchedState::new(1);
    insert_ready(&mut sched, "low", 1, TaskKind::Sync);
    insert_ready(&mut sched, "high", 5, TaskKind::Sync);
    insert_ready(&mut sched, "low-later", 1, TaskKind::Sync);

    let order: Vec<_> = std::iter::from_fn(|| sched.pop_ready(TaskKind::Sync))
        .map(|e| e.task_id.0)
        .collect();
    assert_eq!(order, vec!["high", "low", "low-later"]);
}

#[test]
fn pop_filters_by_pool() {
    let mut sched = SchedState::new(1);
    insert_ready(&mut sched, "s", 0, TaskKind::Sync);
    insert_ready(&mut sched, "a", 9, TaskKind::Async);

    assert_eq!(sched.pop_ready(TaskKind::Sync).unwrap().task_id.0, "s");
    assert!(sched.pop_ready(TaskKind::Sync).is_none());
    assert_eq!(sched.pop_ready(TaskKind::Async).unwrap().task_id.0, "a");
}

#[test]
fn aging_lets_a_starved_task_overtake() {
    let mut sched = SchedState::new(1);
    insert_ready(&mut sched, "old-low", 0, TaskKind::Sync);
    for _ in 0..5 {
        sched.age_tick();
    }
    insert_ready(&mut sched, "new-high", 3, TaskKind::Sync);

    assert_eq!(sched.pop_ready(TaskKind::Sync).unwrap().task_id.0, "old-low");
}

#[test]
fn zero_increment_disables_aging() {
    let mut sched = SchedState::new(0);
    insert_ready(&mut sched, "old-low", 0, TaskKind::Sync);
    for _ in 0..100 {
        sched.age_tick();
    }
    insert_ready(&mut sched, "new-high", 3, TaskKind::Sync);

    assert_eq!(sched.pop_ready(TaskKind::Sync).unwrap().task_id.0, "new-high");
}

#[test]
fn dependency_release_carries_resolved_value() {
    let mut sched = SchedState::new(1);
    let dep = queued_task("dep", 0);
    sched.insert(dep.clone(), TaskKind::Sync, vec![]);
    let dependent = queued_task("dependent", 0);
    sched.insert(
        dependent,
        TaskKind::Sync,
        vec![("result".to_string(), dep.clone())],
    );

    assert_eq!(sched.backlog(TaskKind::Sync), 1, "dependent is not ready yet");

    sched.pop_ready(TaskKind::Sync).unwrap();
    run_and_complete(&dep, json!(7));
    sched.on_task_terminal(dep.id());

    let entry = sched.pop_ready(TaskKind::Sync).unwrap();
    assert_eq!(entry.task_id.0, "dependent");
    assert_eq!(entry.resolved.get("result"), Some(&json!(7)));
}

#[test]
fn dependency_failure_cascades_through_pending() {
    let mut sched = SchedState::new(1);
    let a = queued_task("a", 0);
    let b = queued_task("b", 0);
    let c = queued_task("c", 0);
    sched.insert(a.clone(), TaskKind::Sync, vec![]);
    sched.insert(b.clone(), TaskKind::Sync, vec![("result".to_string(), a.clone())]);
    sched.insert(c.clone(), TaskKind::Sync, vec![("result".to_string(), b.clone())]);

    sched.pop_ready(TaskKind::Sync).unwrap();
    assert!(a.fail(TaskError::Execution {
        message: "boom".to_string(),
    }));
    sched.on_task_terminal(a.id());

    assert_eq!(b.state(), TaskState::Failed);
    assert_eq!(c.state(), TaskState::Failed);
    match b.try_result() {
        Some(Err(TaskError::DependencyResolution { dep, detail })) => {
            assert_eq!(dep, *a.id());
            assert!(detail.contains("boom"));
        }
        other => panic!("expected dependency failure, got {other:?}"),
    }
    match c.try_result() {
        Some(Err(TaskError::DependencyResolution { dep, .. })) => assert_eq!(dep, *b.id()),
        other => panic!("expected dependency failure, got {other:?}"),
    }
    assert_eq!(sched.outstanding(), 0);
}

#[test]
fn terminal_dep_settles_at_insert() {
    let mut sched = SchedState::new(1);
    let dep = queued_task("dep", 0);
    run_and_complete(&dep, json!("early"));

    sched.insert(
        queued_task("dependent", 0),
        TaskKind::Sync,
        vec![("result".to_string(), dep)],
    );
    let entry = sched.pop_ready(TaskKind::Sync).unwrap();
    assert_eq!(entry.resolved.get("result"), Some(&json!("early")));
}

#[test]
fn failed_dep_fails_at_insert() {
    let mut sched = SchedState::new(1);
    let dep = queued_task("dep", 0);
    assert!(dep.fail(TaskError::Execution {
        message: "no".to_string(),
    }));

    let dependent = queued_task("dependent", 0);
    sched.insert(
        dependent.clone(),
        TaskKind::Sync,
        vec![("result".to_string(), dep)],
    );
    assert_eq!(dependent.state(), TaskState::Failed);
    assert_eq!(sched.outstanding(), 0);
}

#[test]
fn remove_queued_covers_ready_and_pending() {
    let mut sched = SchedState::new(1);
    let dep = queued_task("dep", 0);
    sched.insert(dep.clone(), TaskKind::Sync, vec![]);
    sched.insert(
        queued_task("pending", 0),
        TaskKind::Sync,
        vec![("result".to_string(), dep)],
    );

    assert!(sched.remove_queued(&TaskId::from("dep")));
    assert!(sched.remove_queued(&TaskId::from("pending")));
    assert!(!sched.remove_queued(&TaskId::from("gone")));
    assert_eq!(sched.depth(TaskKind::Sync), 0);
}

#[test]
fn requeue_keeps_attempts_and_base_priority() {
    let mut sched = SchedState::new(1);
    insert_ready(&mut sched, "crashy", 2, TaskKind::Sync);
    let entry = sched.pop_ready(TaskKind::Sync).unwrap();
    assert_eq!(entry.attempts, 0);

    sched.requeue(entry.task_id, entry.kind, entry.resolved, 1);
    let again = sched.pop_ready(TaskKind::Sync).unwrap();
    assert_eq!(again.attempts, 1);
    assert_eq!(again.effective_priority, 2);
}

#[test]
fn depth_and_backlog_count_per_pool() {
    let mut sched = SchedState::new(1);
    let dep = queued_task("dep", 0);
    sched.insert(dep.clone(), TaskKind::Sync, vec![]);
    sched.insert(
        queued_task("waiting", 0),
        TaskKind::Sync,
        vec![("result".to_string(), dep)],
    );
    insert_ready(&mut sched, "a", 0, TaskKind::Async);

    assert_eq!(sched.backlog(TaskKind::Sync), 1);
    assert_eq!(sched.depth(TaskKind::Sync), 2);
    assert_eq!(sched.depth(TaskKind::Async), 1);
    assert_eq!(sched.outstanding(), 3);
}

proptest! {
    #[test]
    fn pop_order_is_priority_desc_then_fifo(priorities in proptest::collection::vec(0i64..10, 1..40)) {
        let mut sched = SchedState::new(1);
        for (i, priority) in priorities.iter().enumerate() {
            insert_ready(&mut sched, &format!("t-{i}"), *priority, TaskKind::Sync);
        }

        let popped: Vec<_> = std::iter::from_fn(|| sched.pop_ready(TaskKind::Sync)).collect();
        prop_assert_eq!(popped.len(), priorities.len());
        for pair in popped.windows(2) {
            prop_assert!(pair[0].effective_priority >= pair[1].effective_priority);
            if pair[0].effective_priority == pair[1].effective_priority {
                prop_assert!(pair[0].seq < pair[1].seq);
            }
        }
    }
}
