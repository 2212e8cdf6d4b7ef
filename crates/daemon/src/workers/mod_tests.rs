// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fm_bus::{topics, Bus, MemoryBus};
use fm_core::FakeClock;
use fm_store::{MemoryStore, StateStore};

fn details(id: &str, caps: &[&str]) -> ServerDetails {
    ServerDetails {
        server_id: ServerId::new(id),
        name: format!("{id}-name"),
        version: "2.1.0".to_string(),
        endpoints: vec![format!("tcp://{id}:7000")],
        capabilities: caps.iter().copied().collect(),
    }
}

struct Fixture {
    registry: WorkerRegistry<FakeClock>,
    control: Arc<FakeControlPlane>,
    store: Arc<MemoryStore<FakeClock>>,
    clock: FakeClock,
}

fn fixture() -> Fixture {
    let clock = FakeClock::new();
    let control = Arc::new(FakeControlPlane::new());
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let registry = WorkerRegistry::new(
        Arc::clone(&control) as Arc<dyn ControlPlane>,
        Arc::clone(&store) as Arc<dyn StateStore>,
        EventFeed::new(),
        clock.clone(),
        ProbeIntervals::default(),
    );
    Fixture { registry, control, store, clock }
}

#[tokio::test]
async fn register_fetches_details_and_persists() {
    let f = fixture();
    f.control.add_server(details("srv-1", &["gpu", "cuda"]));

    f.registry.register(&ServerId::new("srv-1")).await.unwrap();

    let record = f.registry.get(&ServerId::new("srv-1")).unwrap();
    assert_eq!(record.name, "srv-1-name");
    assert_eq!(record.health, WorkerHealth::Healthy);
    assert!(record.capabilities.contains("cuda"));

    let stored = f.store.get("worker:srv-1").await.unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn register_unknown_server_fails() {
    let f = fixture();
    let err = f.registry.register(&ServerId::new("ghost")).await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::UnknownServer(_)));
}

#[tokio::test]
async fn reregister_keeps_registration_time_but_refreshes_capabilities() {
    let f = fixture();
    f.control.add_server(details("srv-1", &["gpu"]));
    f.registry.register(&ServerId::new("srv-1")).await.unwrap();
    let first = f.registry.get(&ServerId::new("srv-1")).unwrap();

    f.clock.advance(Duration::from_secs(60));
    f.control.add_server(details("srv-1", &["gpu", "fp16"]));
    f.registry.register(&ServerId::new("srv-1")).await.unwrap();

    let second = f.registry.get(&ServerId::new("srv-1")).unwrap();
    assert_eq!(second.registered_at_ms, first.registered_at_ms);
    assert!(second.capabilities.contains("fp16"));
    assert!(second.last_check_at_ms > first.last_check_at_ms);
}

#[tokio::test]
async fn unregister_purges_record_and_document() {
    let f = fixture();
    f.control.add_server(details("srv-1", &["gpu"]));
    f.registry.register(&ServerId::new("srv-1")).await.unwrap();

    f.registry.unregister(&ServerId::new("srv-1")).await;
    assert!(f.registry.get(&ServerId::new("srv-1")).is_none());
    assert_eq!(f.store.get("worker:srv-1").await.unwrap(), None);
}

#[tokio::test]
async fn probe_error_marks_worker_unreachable() {
    let f = fixture();
    f.control.add_server(details("srv-1", &["gpu"]));
    f.registry.register(&ServerId::new("srv-1")).await.unwrap();

    f.control.set_probe_error(&ServerId::new("srv-1"), "connection refused");
    f.registry.probe_all().await;

    let record = f.registry.get(&ServerId::new("srv-1")).unwrap();
    assert_eq!(record.health, WorkerHealth::Unreachable);
    assert!(f.registry.discover(&["gpu"].into_iter().collect()).is_empty());
}

#[tokio::test]
async fn recovered_probe_restores_discovery() {
    let f = fixture();
    f.control.add_server(details("srv-1", &["gpu"]));
    f.registry.register(&ServerId::new("srv-1")).await.unwrap();
    f.control.set_probe_error(&ServerId::new("srv-1"), "down");
    f.registry.probe_all().await;

    f.control.set_health(&ServerId::new("srv-1"), WorkerHealth::Healthy);
    f.registry.probe_all().await;

    let matched = f.registry.discover(&["gpu"].into_iter().collect());
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].server_id, "srv-1");
}

#[tokio::test]
async fn health_change_emits_one_event_per_transition() {
    let f = fixture();
    let mut rx = {
        // fixture owns the feed indirectly; re-register with a tapped feed
        let feed = EventFeed::new();
        let registry = WorkerRegistry::new(
            Arc::clone(&f.control) as Arc<dyn ControlPlane>,
            Arc::clone(&f.store) as Arc<dyn StateStore>,
            feed.clone(),
            f.clock.clone(),
            ProbeIntervals::default(),
        );
        f.control.add_server(details("srv-1", &["gpu"]));
        registry.register(&ServerId::new("srv-1")).await.unwrap();
        let rx = feed.subscribe();
        f.control.set_health(&ServerId::new("srv-1"), WorkerHealth::Unhealthy);
        registry.probe_all().await;
        registry.probe_all().await;
        rx
    };

    let first = rx.recv().await.unwrap();
    assert_eq!(
        first,
        Event::WorkerHealthChanged { server_id: ServerId::new("srv-1"), health: WorkerHealth::Unhealthy }
    );
    // second probe reported the same status; no second event
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn discovery_registers_unknown_servers() {
    let f = fixture();
    f.control.add_server(details("srv-1", &["gpu"]));
    f.control.add_server(details("srv-2", &["cpu"]));

    f.registry.discover_once().await;

    assert_eq!(f.registry.snapshot().len(), 2);
}

#[tokio::test]
async fn feed_applies_register_and_unregister() {
    let f = fixture();
    f.control.add_server(details("srv-1", &["gpu"]));
    let bus = MemoryBus::new();

    let register = serde_json::to_vec(&Announcement {
        server_id: ServerId::new("srv-1"),
        action: AnnouncementAction::Register,
    })
    .unwrap();
    bus.publish(topics::SERVER_REGISTRY, "srv-1", register).await.unwrap();

    let sub = bus.subscribe(topics::SERVER_REGISTRY, topics::REGISTRY_GROUP).await.unwrap();
    let registry = f.registry.clone();
    let bus_handle: Arc<dyn Bus> = Arc::new(bus.clone());
    let feed = tokio::spawn(async move { registry.run_feed(sub, bus_handle).await });

    // wait for the record to appear
    for _ in 0..100 {
        if f.registry.get(&ServerId::new("srv-1")).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(f.registry.get(&ServerId::new("srv-1")).is_some());

    let unregister = serde_json::to_vec(&Announcement {
        server_id: ServerId::new("srv-1"),
        action: AnnouncementAction::Unregister,
    })
    .unwrap();
    bus.publish(topics::SERVER_REGISTRY, "srv-1", unregister).await.unwrap();

    for _ in 0..100 {
        if f.registry.get(&ServerId::new("srv-1")).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(f.registry.get(&ServerId::new("srv-1")).is_none());

    f.registry.shutdown();
    let _ = feed.await;
}

#[test]
fn unknown_announcement_actions_deserialize_to_unknown() {
    let parsed: Announcement =
        serde_json::from_str(r#"{"server_id":"srv-1","action":"reboot"}"#).unwrap();
    assert_eq!(parsed.action, AnnouncementAction::Unknown);
}
