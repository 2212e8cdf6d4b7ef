// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control event feed: admin commands consumed from the bus.
//!
//! Every engine instance subscribes with its own consumer group, so
//! commands behave as broadcasts: each instance applies pause/resume/
//! cancel on receipt.

use crate::engine::Engine;
use fm_bus::{topics, Bus, Subscription};
use fm_core::{Clock, Command};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const FEED_BATCH: usize = 16;
const FEED_BACKOFF: Duration = Duration::from_millis(200);

/// Consume the command topic until the engine shuts down.
pub async fn run_feed<C: Clock>(
    engine: Engine<C>,
    mut sub: Box<dyn Subscription>,
    bus: Arc<dyn Bus>,
    group: &str,
) {
    info!(group, "command feed consuming");
    loop {
        let records = tokio::select! {
            _ = engine.cancelled() => return,
            polled = sub.poll(FEED_BATCH) => match polled {
                Ok(records) => records,
                Err(err) => {
                    warn!(%err, "command topic poll failed");
                    tokio::time::sleep(FEED_BACKOFF).await;
                    continue;
                }
            },
        };
        for record in records {
            match Command::decode(&record.payload) {
                Some(Command::Pause) => engine.pause(),
                Some(Command::Resume) => engine.resume().await,
                Some(Command::Stats) => engine.log_stats(),
                Some(Command::Cancel { id }) => {
                    let outcome = engine.request_cancel(&id).await;
                    info!(task = %id, outcome = outcome.message(), "cancel command applied");
                }
                Some(Command::Unknown) => {
                    warn!(
                        partition = record.partition,
                        offset = record.offset,
                        "unknown command ignored"
                    );
                }
                None => {
                    warn!(
                        partition = record.partition,
                        offset = record.offset,
                        "undecodable command ignored"
                    );
                }
            }
            if let Err(err) = bus.commit(topics::COMMANDS, group, record.partition, record.offset).await {
                warn!(%err, "command feed commit failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
