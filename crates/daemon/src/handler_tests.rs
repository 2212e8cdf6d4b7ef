// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn registered_closure_executes() {
    let registry = HandlerRegistry::new();
    registry.register_fn("echo", |payload, _cancel| async move { Ok(payload.data) });

    let handler = registry.get("echo").unwrap();
    let out = handler
        .execute(TaskPayload::text("hi"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out, b"hi");
}

#[tokio::test]
async fn missing_kind_returns_none() {
    let registry = HandlerRegistry::new();
    assert!(registry.get("nope").is_none());
}

#[tokio::test]
async fn handlers_can_observe_cancellation() {
    let registry = HandlerRegistry::new();
    registry.register_fn("patient", |_payload, cancel| async move {
        cancel.cancelled().await;
        Err(HandlerError::transient("cancelled"))
    });

    let cancel = CancellationToken::new();
    cancel.cancel();
    let handler = registry.get("patient").unwrap();
    let err = handler.execute(TaskPayload::default(), cancel).await.unwrap_err();
    assert!(err.transient);
}

#[test]
fn kinds_are_sorted() {
    let registry = HandlerRegistry::new();
    registry.register_fn("zeta", |_, _| async { Ok(vec![]) });
    registry.register_fn("alpha", |_, _| async { Ok(vec![]) });
    assert_eq!(registry.kinds(), vec!["alpha", "zeta"]);
}

#[test]
fn error_display_carries_the_classification() {
    assert_eq!(HandlerError::transient("x").to_string(), "transient: x");
    assert_eq!(HandlerError::permanent("y").to_string(), "permanent: y");
}
