// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic `/ping` towards WebSocket clients.

use crate::relay::{RelayError, Shared};
use crate::state::RelayState;
use osc_wire::{heartbeat, OscPacket};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Emit `/ping (count, now_ms)` every `period` while the relay is open.
///
/// The counter starts at 0 for each run, so the first ping carries 1.
pub(crate) async fn run(shared: Arc<Shared>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut count: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if shared.state() != RelayState::Open {
            break;
        }

        count += 1;
        let packet = OscPacket::Message(heartbeat(count, now_ms()));
        match shared.send_packet(&packet) {
            Ok(delivered) => {
                shared.stats.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                debug!("Heartbeat #{} sent (delivered: {})", count, delivered);
            }
            Err(RelayError::NotOpen) => break,
            Err(e) => warn!("Heartbeat #{} failed: {}", count, e),
        }
    }

    debug!("Heartbeat stopped after {} pings", count);
}
