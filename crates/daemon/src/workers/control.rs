// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC boundary to worker control endpoints.
//!
//! The registry never talks wire protocols itself; it goes through
//! this trait. Production wires in a transport client, tests use
//! [`FakeControlPlane`].

use async_trait::async_trait;
use fm_core::{CapabilitySet, ServerId, WorkerHealth};
use thiserror::Error;

/// Failures from worker control RPCs.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("control rpc failed for {server_id}: {message}")]
    Rpc { server_id: ServerId, message: String },

    #[error("unknown server: {0}")]
    UnknownServer(ServerId),
}

/// Canonical worker description from `GetServerDetails`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDetails {
    pub server_id: ServerId,
    pub name: String,
    pub version: String,
    pub endpoints: Vec<String>,
    pub capabilities: CapabilitySet,
}

/// Client onto a worker's control endpoint.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_server_details(&self, server_id: &ServerId) -> Result<ServerDetails, ControlPlaneError>;

    async fn check_health(&self, server_id: &ServerId) -> Result<WorkerHealth, ControlPlaneError>;

    async fn discover_servers(&self) -> Result<Vec<ServerId>, ControlPlaneError>;
}

/// Control plane with no transport wired.
///
/// Used by deployments that have not configured a worker transport:
/// discovery finds nothing and detail fetches fail, so the inventory
/// stays empty until a real client is plugged in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopControlPlane;

#[async_trait]
impl ControlPlane for NoopControlPlane {
    async fn get_server_details(&self, server_id: &ServerId) -> Result<ServerDetails, ControlPlaneError> {
        Err(ControlPlaneError::UnknownServer(server_id.clone()))
    }

    async fn check_health(&self, server_id: &ServerId) -> Result<WorkerHealth, ControlPlaneError> {
        Err(ControlPlaneError::UnknownServer(server_id.clone()))
    }

    async fn discover_servers(&self) -> Result<Vec<ServerId>, ControlPlaneError> {
        Ok(Vec::new())
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeControlPlane;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Scriptable in-memory control plane.
    #[derive(Default)]
    pub struct FakeControlPlane {
        servers: Mutex<HashMap<ServerId, ServerDetails>>,
        health: Mutex<HashMap<ServerId, Result<WorkerHealth, String>>>,
    }

    impl FakeControlPlane {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make a server discoverable and describable.
        pub fn add_server(&self, details: ServerDetails) {
            self.health.lock().insert(details.server_id.clone(), Ok(WorkerHealth::Healthy));
            self.servers.lock().insert(details.server_id.clone(), details);
        }

        pub fn remove_server(&self, server_id: &ServerId) {
            self.servers.lock().remove(server_id);
            self.health.lock().remove(server_id);
        }

        /// Script the next health probe results for a server.
        pub fn set_health(&self, server_id: &ServerId, health: WorkerHealth) {
            self.health.lock().insert(server_id.clone(), Ok(health));
        }

        /// Make health probes fail (probe error, not reported status).
        pub fn set_probe_error(&self, server_id: &ServerId, message: impl Into<String>) {
            self.health.lock().insert(server_id.clone(), Err(message.into()));
        }
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn get_server_details(&self, server_id: &ServerId) -> Result<ServerDetails, ControlPlaneError> {
            self.servers
                .lock()
                .get(server_id)
                .cloned()
                .ok_or_else(|| ControlPlaneError::UnknownServer(server_id.clone()))
        }

        async fn check_health(&self, server_id: &ServerId) -> Result<WorkerHealth, ControlPlaneError> {
            match self.health.lock().get(server_id) {
                Some(Ok(health)) => Ok(*health),
                Some(Err(message)) => Err(ControlPlaneError::Rpc {
                    server_id: server_id.clone(),
                    message: message.clone(),
                }),
                None => Err(ControlPlaneError::UnknownServer(server_id.clone())),
            }
        }

        async fn discover_servers(&self) -> Result<Vec<ServerId>, ControlPlaneError> {
            let mut ids: Vec<ServerId> = self.servers.lock().keys().cloned().collect();
            ids.sort();
            Ok(ids)
        }
    }
}
