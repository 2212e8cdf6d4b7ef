// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn position() -> BusPosition {
    BusPosition { partition: 0, offset: 0 }
}

fn insert(registry: &TaskRegistry, id: &str, state: TaskState) {
    let mut task = Task::builder().id(id).build();
    task.state = state;
    registry.upsert(task, CancellationToken::new(), position());
}

#[test]
fn upsert_get_remove_roundtrip() {
    let registry = TaskRegistry::new();
    insert(&registry, "t1", TaskState::Pending);

    assert!(registry.contains(&TaskId::new("t1")));
    assert_eq!(registry.get(&TaskId::new("t1")).unwrap().id, "t1");

    let removed = registry.remove(&TaskId::new("t1")).unwrap();
    assert_eq!(removed.task.id, "t1");
    assert!(registry.is_empty());
}

#[test]
fn running_count_ignores_pending_entries() {
    let registry = TaskRegistry::new();
    insert(&registry, "queued", TaskState::Pending);
    insert(&registry, "assigned", TaskState::Assigned);
    insert(&registry, "working", TaskState::Processing);

    assert_eq!(registry.len(), 3);
    assert_eq!(registry.running_count(), 2);
    assert_eq!(registry.count_in(TaskState::Pending), 1);
}

#[test]
fn update_mutates_in_place() {
    let registry = TaskRegistry::new();
    insert(&registry, "t1", TaskState::Assigned);

    let updated = registry
        .update(&TaskId::new("t1"), |t| t.transition(TaskState::Processing, 2_000))
        .unwrap();
    assert_eq!(updated.state, TaskState::Processing);
    assert_eq!(registry.get(&TaskId::new("t1")).unwrap().state, TaskState::Processing);
}

#[test]
fn update_on_missing_task_returns_none() {
    let registry = TaskRegistry::new();
    assert!(registry.update(&TaskId::new("nope"), |_| {}).is_none());
}

#[test]
fn cancel_token_is_shared_with_the_entry() {
    let registry = TaskRegistry::new();
    let token = CancellationToken::new();
    registry.upsert(Task::builder().id("t1").build(), token.clone(), position());

    registry.cancel_token(&TaskId::new("t1")).unwrap().cancel();
    assert!(token.is_cancelled());
}
