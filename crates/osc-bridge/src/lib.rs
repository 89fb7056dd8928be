// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC UDP <-> WebSocket relay
//!
//! Lets browser clients talk to OSC hardware and software that only
//! speaks UDP: datagrams from the controller are fanned out to every
//! connected WebSocket client as binary frames, and binary frames from
//! any client are sent as datagrams to the controller.
//!
//! # Quick Start
//!
//! ```bash
//! # Defaults: UDP in on localhost:8000, out to localhost:9000, WS on localhost:8080
//! osc-bridge
//!
//! # Talk to a console on the LAN, with a 5s /ping heartbeat
//! osc-bridge --udp-host 0.0.0.0 --remote-host 192.168.1.20 --auto-ping
//!
//! # Using config file
//! osc-bridge --config bridge.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! name = "stage-left"
//!
//! [udp_server]
//! host = "0.0.0.0"
//! port = 8000
//! exclusive = false
//!
//! [udp_client]
//! host = "192.168.1.20"
//! port = 9000
//!
//! [ws_server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [heartbeat]
//! enabled = true
//! interval_ms = 5000
//! ```

pub mod config;
mod heartbeat;
pub mod net;
pub mod relay;
mod session;
pub mod state;
pub mod stats;

pub use config::{
    BridgeConfig, ConfigError, EndpointConfig, HeartbeatConfig, RemoteConfig, WsServerConfig,
};
pub use net::local_ipv4_addresses;
pub use relay::{BoundAddrs, Relay, RelayError, RelayEvent, Transport};
pub use state::RelayState;
pub use stats::{Direction, DirectionStatsSnapshot, RelayStats, RelayStatsSnapshot};
