// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker registry: identity, capabilities, and health.
//!
//! Three loops run in parallel: the registration feed (bus), the
//! periodic health probe, and periodic rediscovery. All of them funnel
//! into one `RwLock`'d inventory map; readers take snapshots.

mod control;
mod matcher;

pub use control::{ControlPlane, ControlPlaneError, NoopControlPlane, ServerDetails};
#[cfg(any(test, feature = "test-support"))]
pub use control::FakeControlPlane;
pub use matcher::matching_workers;

use crate::events::EventFeed;
use fm_bus::{topics, Bus, Subscription};
use fm_core::{CapabilitySet, Clock, Event, ServerId, WorkerHealth, WorkerRecord};
use fm_store::{docs, keys, StateStore};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FEED_BATCH: usize = 16;
const FEED_BACKOFF: Duration = Duration::from_millis(200);

/// Probe cadences, adjustable at runtime via UpdateConfig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeIntervals {
    pub health_check: Duration,
    pub discovery: Duration,
}

impl Default for ProbeIntervals {
    fn default() -> Self {
        Self { health_check: Duration::from_secs(30), discovery: Duration::from_secs(60) }
    }
}

/// Registration announcement carried on the `server-registry` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub server_id: ServerId,
    pub action: AnnouncementAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnouncementAction {
    Register,
    Unregister,
    /// Forward compatibility: skipped with a warning.
    #[serde(other)]
    Unknown,
}

struct RegistryInner<C: Clock> {
    workers: RwLock<HashMap<ServerId, WorkerRecord>>,
    control: Arc<dyn ControlPlane>,
    store: Arc<dyn StateStore>,
    events: EventFeed,
    clock: C,
    intervals: Mutex<ProbeIntervals>,
    shutdown: CancellationToken,
}

/// Cloneable handle on the worker inventory.
pub struct WorkerRegistry<C: Clock> {
    inner: Arc<RegistryInner<C>>,
}

impl<C: Clock> Clone for WorkerRegistry<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock> WorkerRegistry<C> {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        store: Arc<dyn StateStore>,
        events: EventFeed,
        clock: C,
        intervals: ProbeIntervals,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                workers: RwLock::new(HashMap::new()),
                control,
                store,
                events,
                clock,
                intervals: Mutex::new(intervals),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn intervals(&self) -> ProbeIntervals {
        *self.inner.intervals.lock()
    }

    pub fn set_intervals(&self, intervals: ProbeIntervals) {
        *self.inner.intervals.lock() = intervals;
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Fetch canonical details and store the record. Idempotent: a
    /// re-register refreshes capabilities but keeps `registered_at`.
    pub async fn register(&self, server_id: &ServerId) -> Result<(), ControlPlaneError> {
        let inner = &self.inner;
        let details = inner.control.get_server_details(server_id).await?;
        let now = inner.clock.epoch_ms();

        let record = {
            let mut workers = inner.workers.write();
            let registered_at_ms =
                workers.get(server_id).map(|w| w.registered_at_ms).unwrap_or(now);
            let record = WorkerRecord {
                server_id: details.server_id,
                name: details.name,
                version: details.version,
                endpoints: details.endpoints,
                capabilities: details.capabilities,
                health: WorkerHealth::Healthy,
                last_check_at_ms: now,
                registered_at_ms,
            };
            workers.insert(server_id.clone(), record.clone());
            record
        };

        if let Err(err) = inner.store.put(&keys::worker_key(server_id), docs::encode_worker(&record), None).await {
            warn!(server = %server_id, %err, "worker record write failed");
        }
        info!(server = %server_id, name = %record.name, "worker registered");
        inner.events.emit(Event::WorkerRegistered { server_id: server_id.clone(), name: record.name });
        Ok(())
    }

    /// Purge the record immediately.
    pub async fn unregister(&self, server_id: &ServerId) {
        let inner = &self.inner;
        let removed = inner.workers.write().remove(server_id);
        if removed.is_some() {
            if let Err(err) = inner.store.delete(&keys::worker_key(server_id)).await {
                warn!(server = %server_id, %err, "worker record delete failed");
            }
            info!(server = %server_id, "worker unregistered");
            inner.events.emit(Event::WorkerUnregistered { server_id: server_id.clone() });
        }
    }

    pub fn get(&self, server_id: &ServerId) -> Option<WorkerRecord> {
        self.inner.workers.read().get(server_id).cloned()
    }

    /// Full inventory snapshot, ordered by server id.
    pub fn snapshot(&self) -> Vec<WorkerRecord> {
        let mut all: Vec<WorkerRecord> = self.inner.workers.read().values().cloned().collect();
        all.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        all
    }

    /// Capability lookup over healthy workers.
    pub fn discover(&self, required: &CapabilitySet) -> Vec<WorkerRecord> {
        let workers = self.inner.workers.read();
        let all: Vec<WorkerRecord> = workers.values().cloned().collect();
        drop(workers);
        matching_workers(&all, required)
    }

    /// Consume the `server-registry` topic until shutdown.
    pub async fn run_feed(&self, mut sub: Box<dyn Subscription>, bus: Arc<dyn Bus>) {
        let inner = &self.inner;
        info!("worker registry consuming registration feed");
        loop {
            let records = tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                polled = sub.poll(FEED_BATCH) => match polled {
                    Ok(records) => records,
                    Err(err) => {
                        warn!(%err, "registration feed poll failed");
                        tokio::time::sleep(FEED_BACKOFF).await;
                        continue;
                    }
                },
            };
            for record in records {
                match serde_json::from_slice::<Announcement>(&record.payload) {
                    Ok(announcement) => self.apply_announcement(announcement).await,
                    Err(err) => {
                        warn!(
                            partition = record.partition,
                            offset = record.offset,
                            %err,
                            "malformed registry announcement"
                        );
                    }
                }
                // Registration handling is idempotent, so committing
                // per record keeps redelivery windows small.
                if let Err(err) = bus
                    .commit(topics::SERVER_REGISTRY, topics::REGISTRY_GROUP, record.partition, record.offset)
                    .await
                {
                    warn!(%err, "registry feed commit failed");
                }
            }
        }
    }

    async fn apply_announcement(&self, announcement: Announcement) {
        match announcement.action {
            AnnouncementAction::Register => {
                if let Err(err) = self.register(&announcement.server_id).await {
                    warn!(server = %announcement.server_id, %err, "registration failed");
                }
            }
            AnnouncementAction::Unregister => self.unregister(&announcement.server_id).await,
            AnnouncementAction::Unknown => {
                warn!(server = %announcement.server_id, "unknown registry action ignored");
            }
        }
    }

    /// Periodic health probe loop.
    pub async fn run_health_loop(&self) {
        let inner = &self.inner;
        loop {
            let interval = inner.intervals.lock().health_check;
            tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            self.probe_all().await;
        }
    }

    /// Probe every known worker once.
    pub async fn probe_all(&self) {
        let inner = &self.inner;
        let ids: Vec<ServerId> = inner.workers.read().keys().cloned().collect();
        for server_id in ids {
            let probed = match inner.control.check_health(&server_id).await {
                Ok(health) => health,
                Err(err) => {
                    debug!(server = %server_id, %err, "health probe failed");
                    WorkerHealth::Unreachable
                }
            };
            let now = inner.clock.epoch_ms();
            let updated = {
                let mut workers = inner.workers.write();
                let Some(record) = workers.get_mut(&server_id) else { continue };
                let changed = record.health != probed;
                record.health = probed;
                record.last_check_at_ms = now;
                (record.clone(), changed)
            };
            let (record, changed) = updated;
            if let Err(err) = inner.store.put(&keys::worker_key(&server_id), docs::encode_worker(&record), None).await {
                warn!(server = %server_id, %err, "worker record write failed");
            }
            if changed {
                info!(server = %server_id, health = %probed, "worker health changed");
                inner.events.emit(Event::WorkerHealthChanged { server_id, health: probed });
            }
        }
    }

    /// Periodic rediscovery loop.
    pub async fn run_discovery_loop(&self) {
        let inner = &self.inner;
        loop {
            let interval = inner.intervals.lock().discovery;
            tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            self.discover_once().await;
        }
    }

    /// One rediscovery sweep: register any servers we do not know yet.
    pub async fn discover_once(&self) {
        let inner = &self.inner;
        let discovered = match inner.control.discover_servers().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "server discovery failed");
                return;
            }
        };
        for server_id in discovered {
            let known = inner.workers.read().contains_key(&server_id);
            if !known {
                if let Err(err) = self.register(&server_id).await {
                    warn!(server = %server_id, %err, "discovered server registration failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
