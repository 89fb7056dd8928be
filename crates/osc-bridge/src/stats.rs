// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay traffic statistics.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// One forwarding direction of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    UdpToWs,
    WsToUdp,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UdpToWs => f.write_str("UDP -> WS"),
            Self::WsToUdp => f.write_str("WS -> UDP"),
        }
    }
}

/// Counters for one direction.
#[derive(Debug)]
pub struct DirectionStats {
    pub direction: Direction,

    /// Messages successfully forwarded.
    pub messages_forwarded: AtomicU64,

    /// Bytes forwarded.
    pub bytes_forwarded: AtomicU64,

    /// Messages dropped (malformed, or nobody to deliver to).
    pub messages_dropped: AtomicU64,

    /// Transport errors (failed sends).
    pub errors: AtomicU64,
}

impl DirectionStats {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            messages_forwarded: AtomicU64::new(0),
            bytes_forwarded: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Record a forwarded message.
    pub fn record_message(&self, bytes: u64) {
        self.messages_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_forwarded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a dropped message.
    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, uptime_secs: u64) -> DirectionStatsSnapshot {
        DirectionStatsSnapshot {
            direction: self.direction,
            messages_forwarded: self.messages_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime_secs,
        }
    }
}

/// Statistics for a relay, shared by all of its tasks.
#[derive(Debug)]
pub struct RelayStats {
    pub udp_to_ws: DirectionStats,
    pub ws_to_udp: DirectionStats,
    pub heartbeats_sent: AtomicU64,
    pub created: Instant,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            udp_to_ws: DirectionStats::new(Direction::UdpToWs),
            ws_to_udp: DirectionStats::new(Direction::WsToUdp),
            heartbeats_sent: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Counters for one direction.
    pub fn direction(&self, direction: Direction) -> &DirectionStats {
        match direction {
            Direction::UdpToWs => &self.udp_to_ws,
            Direction::WsToUdp => &self.ws_to_udp,
        }
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        let uptime_secs = self.created.elapsed().as_secs();
        RelayStatsSnapshot {
            udp_to_ws: self.udp_to_ws.snapshot(uptime_secs),
            ws_to_udp: self.ws_to_udp.snapshot(uptime_secs),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one direction.
#[derive(Debug, Clone, Serialize)]
pub struct DirectionStatsSnapshot {
    pub direction: Direction,
    pub messages_forwarded: u64,
    pub bytes_forwarded: u64,
    pub messages_dropped: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

impl DirectionStatsSnapshot {
    /// Calculate messages per second.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.messages_forwarded as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    /// Calculate bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.bytes_forwarded as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

/// Snapshot of relay statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatsSnapshot {
    pub udp_to_ws: DirectionStatsSnapshot,
    pub ws_to_udp: DirectionStatsSnapshot,
    pub heartbeats_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_counters() {
        let stats = RelayStats::new();

        stats.udp_to_ws.record_message(100);
        stats.udp_to_ws.record_message(28);
        stats.udp_to_ws.record_dropped();
        stats.direction(Direction::WsToUdp).record_error();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.udp_to_ws.messages_forwarded, 2);
        assert_eq!(snapshot.udp_to_ws.bytes_forwarded, 128);
        assert_eq!(snapshot.udp_to_ws.messages_dropped, 1);
        assert_eq!(snapshot.ws_to_udp.errors, 1);
        assert_eq!(snapshot.ws_to_udp.messages_forwarded, 0);
    }

    #[test]
    fn test_rates_without_uptime() {
        let snapshot = RelayStats::new().snapshot();
        assert_eq!(snapshot.udp_to_ws.messages_per_second(), 0.0);
        assert_eq!(snapshot.ws_to_udp.bytes_per_second(), 0.0);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::UdpToWs.to_string(), "UDP -> WS");
        assert_eq!(Direction::WsToUdp.to_string(), "WS -> UDP");
    }
}
