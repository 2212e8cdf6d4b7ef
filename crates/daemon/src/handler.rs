// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler contract: pluggable per-kind execution logic.
//!
//! Handlers are the boundary to user code. They receive the opaque
//! payload plus a cancellation token and report failures tagged with
//! terminality; the engine never retries an error the handler declares
//! permanent, regardless of attempt budget.

use async_trait::async_trait;
use fm_core::TaskPayload;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Failure reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// Transient errors are retried per policy; permanent ones fail
    /// the task immediately.
    pub transient: bool,
    pub message: String,
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { transient: true, message: message.into() }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self { transient: false, message: message.into() }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.transient { "transient" } else { "permanent" };
        write!(f, "{kind}: {}", self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Per-kind execution logic.
///
/// Handlers must honour `cancel` promptly; once the engine raises it
/// (timeout, external cancel, shutdown) the return value is ignored.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn execute(
        &self,
        payload: TaskPayload,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, HandlerError>;
}

/// Registry mapping task kinds to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.write().insert(kind.into(), handler);
    }

    /// Register a closure as a handler.
    pub fn register_fn<F, Fut>(&self, kind: impl Into<String>, f: F)
    where
        F: Fn(TaskPayload, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, HandlerError>> + Send + 'static,
    {
        struct FnHandler<F>(F);

        #[async_trait]
        impl<F, Fut> Handler for FnHandler<F>
        where
            F: Fn(TaskPayload, CancellationToken) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<Vec<u8>, HandlerError>> + Send + 'static,
        {
            async fn execute(
                &self,
                payload: TaskPayload,
                cancel: CancellationToken,
            ) -> Result<Vec<u8>, HandlerError> {
                (self.0)(payload, cancel).await
            }
        }

        self.register(kind, Arc::new(FnHandler(f)));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
