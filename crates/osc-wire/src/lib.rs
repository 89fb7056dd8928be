// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC wire types and codec.
//!
//! Shared by the UDP/WebSocket bridge and the WebSocket stream adapter.
//!
//! ```
//! use osc_wire::{decode, encode, OscArg, OscMessage, OscPacket};
//!
//! let msg = OscMessage::new("/fader/1", vec![OscArg::Float(0.5)]).unwrap();
//! let bytes = encode(&OscPacket::Message(msg.clone())).unwrap();
//! assert_eq!(decode(&bytes).unwrap(), OscPacket::Message(msg));
//! ```

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{decode, encode};
pub use error::{DecodeError, EncodeError, MessageError};
pub use message::{heartbeat, OscArg, OscBundle, OscMessage, OscPacket, OscTime, HEARTBEAT_ADDRESS};
