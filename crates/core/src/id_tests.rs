// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;

#[test]
fn generated_ids_carry_the_type_prefix() {
    let id = TaskId::generate();
    assert!(id.as_str().starts_with("task-"));
    let id = ServerId::generate();
    assert!(id.as_str().starts_with("srv-"));
}

#[test]
fn generated_ids_are_unique() {
    let a = TaskId::generate();
    let b = TaskId::generate();
    assert_ne!(a, b);
}

#[test]
fn caller_assigned_ids_pass_through_verbatim() {
    let id = TaskId::new("build-42");
    assert_eq!(id.as_str(), "build-42");
    assert_eq!(id, "build-42");
}

#[test]
fn task_id_works_as_map_key_via_str_borrow() {
    let mut map = HashMap::new();
    map.insert(TaskId::new("t1"), 1u32);
    assert_eq!(map.get("t1"), Some(&1));
}

#[test]
fn bus_position_id_is_deterministic() {
    let a = TaskId::from_bus_position(3, 17);
    let b = TaskId::from_bus_position(3, 17);
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "task-p3-o17");
}

#[test]
fn serde_roundtrip_is_transparent() {
    let id = ServerId::new("srv-gpu-1");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"srv-gpu-1\"");
    let back: ServerId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}
