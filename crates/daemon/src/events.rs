// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed event feed for observers.
//!
//! A broadcast channel: the engine and the worker registry emit, any
//! number of observers subscribe. Lagging or absent observers never
//! block emission.

use fm_core::Event;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 256;

/// Cloneable handle onto the daemon's event stream.
#[derive(Clone)]
pub struct EventFeed {
    tx: broadcast::Sender<Event>,
}

impl EventFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    /// Emit an event. Dropped silently when nobody is listening.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fm_core::TaskId;

    #[tokio::test]
    async fn subscribers_see_emitted_events() {
        let feed = EventFeed::new();
        let mut rx = feed.subscribe();
        feed.emit(Event::TaskCancelled { id: TaskId::new("t1") });
        let event = rx.recv().await.unwrap();
        assert_eq!(event, Event::TaskCancelled { id: TaskId::new("t1") });
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        let feed = EventFeed::new();
        feed.emit(Event::EnginePaused);
    }
}
