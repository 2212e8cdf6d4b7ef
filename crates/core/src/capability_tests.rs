// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn caps(list: &[&str]) -> CapabilitySet {
    list.iter().copied().collect()
}

#[parameterized(
    empty_required = { &["gpu", "cuda"], &[], true },
    exact_match = { &["gpu"], &["gpu"], true },
    superset = { &["gpu", "cuda", "fp16"], &["gpu", "cuda"], true },
    missing_one = { &["gpu"], &["gpu", "cuda"], false },
    disjoint = { &["cpu"], &["gpu"], false },
    empty_worker = { &[], &["gpu"], false },
)]
fn covers(worker: &[&str], required: &[&str], expected: bool) {
    assert_eq!(caps(worker).covers(&caps(required)), expected);
}

#[test]
fn iteration_is_sorted() {
    let set = caps(&["zstd", "avx", "gpu"]);
    let order: Vec<&str> = set.iter().collect();
    assert_eq!(order, vec!["avx", "gpu", "zstd"]);
}

#[test]
fn serializes_as_a_plain_array() {
    let set = caps(&["gpu", "cuda"]);
    let json = serde_json::to_string(&set).unwrap();
    assert_eq!(json, "[\"cuda\",\"gpu\"]");
}
