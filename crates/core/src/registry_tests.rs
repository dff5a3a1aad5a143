// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn double(input: TaskInput) -> CallOutcome {
    let n = input
        .arg(0)
        .and_then(Value::as_i64)
        .ok_or("missing numeric argument")?;
    Ok(json!(n * 2))
}

#[test]
fn register_sync_resolves_kind() {
    let mut registry = TaskRegistry::new();
    registry.register_sync("double", double);

    assert_eq!(registry.kind_of("double"), Some(TaskKind::Sync));
    assert_eq!(registry.kind_of("missing"), None);
    assert_eq!(registry.len(), 1);
}

#[test]
fn sync_callable_executes() {
    let mut registry = TaskRegistry::new();
    registry.register_sync("double", double);

    let input = TaskInput::new(vec![json!(21)], HashMap::new());
    let Some(Callable::Sync(f)) = registry.get("double") else {
        panic!("expected sync callable");
    };
    assert_eq!(f(input).unwrap(), json!(42));
}

#[tokio::test]
async fn async_callable_executes() {
    let mut registry = TaskRegistry::new();
    registry.register_async("greet", |input: TaskInput| async move {
        let name = input
            .kwarg("name")
            .and_then(Value::as_str)
            .unwrap_or("world")
            .to_string();
        Ok(json!(format!("hello {name}")))
    });

    assert_eq!(registry.kind_of("greet"), Some(TaskKind::Async));

    let mut kwargs = HashMap::new();
    kwargs.insert("name".to_string(), json!("mill"));
    let Some(Callable::Async(f)) = registry.get("greet") else {
        panic!("expected async callable");
    };
    let out = f(TaskInput::new(vec![], kwargs)).await.unwrap();
    assert_eq!(out, json!("hello mill"));
}

#[test]
fn callable_errors_surface_as_call_error() {
    let mut registry = TaskRegistry::new();
    registry.register_sync("double", double);

    let Some(Callable::Sync(f)) = registry.get("double") else {
        panic!("expected sync callable");
    };
    let err = f(TaskInput::default()).unwrap_err();
    assert_eq!(err.to_string(), "missing numeric argument");
}

#[test]
fn reregistering_replaces_entry() {
    let mut registry = TaskRegistry::new();
    registry.register_sync("f", |_| Ok(json!(1)));
    registry.register_async("f", |_| async { Ok(json!(2)) });

    assert_eq!(registry.kind_of("f"), Some(TaskKind::Async));
    assert_eq!(registry.len(), 1);
}
