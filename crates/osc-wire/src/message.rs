// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC message and bundle types.
//!
//! Messages are immutable once built: the address is validated by
//! [`OscMessage::new`] and the fields are only reachable through getters.

use std::fmt;

use crate::error::MessageError;

/// Address used by the bridge heartbeat.
pub const HEARTBEAT_ADDRESS: &str = "/ping";

/// OSC time tag (NTP format: seconds since 1900 + 32-bit fraction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OscTime {
    pub seconds: u32,
    pub fractional: u32,
}

impl OscTime {
    /// The special "immediately" time tag.
    pub const IMMEDIATE: OscTime = OscTime {
        seconds: 0,
        fractional: 1,
    };

    /// Create a time tag from raw NTP parts.
    pub fn new(seconds: u32, fractional: u32) -> Self {
        Self {
            seconds,
            fractional,
        }
    }
}

impl From<rosc::OscTime> for OscTime {
    fn from(time: rosc::OscTime) -> Self {
        Self {
            seconds: time.seconds,
            fractional: time.fractional,
        }
    }
}

impl From<OscTime> for rosc::OscTime {
    fn from(time: OscTime) -> Self {
        rosc::OscTime {
            seconds: time.seconds,
            fractional: time.fractional,
        }
    }
}

impl fmt::Display for OscTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::IMMEDIATE {
            f.write_str("immediate")
        } else {
            write!(f, "{}.{:08x}", self.seconds, self.fractional)
        }
    }
}

/// A single typed OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    /// `i` - 32-bit integer.
    Int(i32),
    /// `f` - 32-bit float.
    Float(f32),
    /// `s` - string.
    String(String),
    /// `b` - blob.
    Blob(Vec<u8>),
    /// `h` - 64-bit integer.
    Long(i64),
    /// `d` - 64-bit float.
    Double(f64),
    /// `T` / `F`.
    Bool(bool),
    /// `N`.
    Nil,
    /// `I` - impulse / infinitum.
    Inf,
    /// `t` - time tag.
    Time(OscTime),
}

impl From<i32> for OscArg {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for OscArg {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for OscArg {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for OscArg {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for OscArg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for OscArg {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for OscArg {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for OscArg {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
            Self::Blob(v) => write!(f, "<blob {} bytes>", v.len()),
            Self::Long(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Nil => f.write_str("nil"),
            Self::Inf => f.write_str("inf"),
            Self::Time(t) => write!(f, "{}", t),
        }
    }
}

/// An OSC message: address pattern plus ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    address: String,
    args: Vec<OscArg>,
}

impl OscMessage {
    /// Build a message, validating the address pattern.
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Result<Self, MessageError> {
        let address = address.into();
        validate_address(&address)?;
        Ok(Self { address, args })
    }

    /// Address pattern (always starts with `/`).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Arguments in wire order.
    pub fn args(&self) -> &[OscArg] {
        &self.args
    }
}

impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OSC Message [{}]: ", self.address)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}

/// An OSC bundle: time tag plus nested packets.
#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    pub time: OscTime,
    pub content: Vec<OscPacket>,
}

/// One datagram / one WebSocket frame worth of OSC.
#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

impl OscPacket {
    /// Number of messages carried, counting nested bundles.
    pub fn message_count(&self) -> usize {
        match self {
            Self::Message(_) => 1,
            Self::Bundle(bundle) => bundle.content.iter().map(OscPacket::message_count).sum(),
        }
    }
}

impl From<OscMessage> for OscPacket {
    fn from(message: OscMessage) -> Self {
        Self::Message(message)
    }
}

impl From<OscBundle> for OscPacket {
    fn from(bundle: OscBundle) -> Self {
        Self::Bundle(bundle)
    }
}

impl fmt::Display for OscPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(msg) => write!(f, "{}", msg),
            Self::Bundle(bundle) => {
                write!(f, "OSC Bundle [{}]: ", bundle.time)?;
                for (i, packet) in bundle.content.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}", packet)?;
                }
                Ok(())
            }
        }
    }
}

/// Build the heartbeat message: `/ping <counter> <timestamp_ms>`.
pub fn heartbeat(counter: u64, timestamp_ms: u64) -> OscMessage {
    OscMessage {
        address: HEARTBEAT_ADDRESS.to_string(),
        args: vec![
            OscArg::Long(counter as i64),
            OscArg::Long(timestamp_ms as i64),
        ],
    }
}

fn validate_address(address: &str) -> Result<(), MessageError> {
    if !address.starts_with('/') {
        return Err(MessageError::InvalidAddress(address.to_string()));
    }
    if address.contains(char::is_whitespace) || address.contains('\0') {
        return Err(MessageError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_must_start_with_slash() {
        assert!(OscMessage::new("/fader/1", vec![]).is_ok());
        assert!(matches!(
            OscMessage::new("fader/1", vec![]),
            Err(MessageError::InvalidAddress(_))
        ));
        assert!(OscMessage::new("", vec![]).is_err());
        assert!(OscMessage::new("/has space", vec![]).is_err());
    }

    #[test]
    fn test_display_matches_text_formatter() {
        let msg = OscMessage::new("/xy", vec![1.into(), 0.5f32.into(), "on".into()]).unwrap();
        assert_eq!(msg.to_string(), "OSC Message [/xy]: 1,0.5,on");

        let empty = OscMessage::new("/play", vec![]).unwrap();
        assert_eq!(empty.to_string(), "OSC Message [/play]: ");
    }

    #[test]
    fn test_heartbeat_message() {
        let ping = heartbeat(3, 1_700_000_000_000);
        assert_eq!(ping.address(), HEARTBEAT_ADDRESS);
        assert_eq!(
            ping.args(),
            &[OscArg::Long(3), OscArg::Long(1_700_000_000_000)]
        );
    }

    #[test]
    fn test_nested_bundle_message_count() {
        let a = OscMessage::new("/a", vec![]).unwrap();
        let b = OscMessage::new("/b", vec![]).unwrap();
        let c = OscMessage::new("/c", vec![]).unwrap();
        let packet = OscPacket::Bundle(OscBundle {
            time: OscTime::IMMEDIATE,
            content: vec![
                a.into(),
                OscPacket::Bundle(OscBundle {
                    time: OscTime::IMMEDIATE,
                    content: vec![b.into()],
                }),
                c.into(),
            ],
        });

        assert_eq!(packet.message_count(), 3);
    }

    #[test]
    fn test_immediate_time_tag() {
        assert_eq!(OscTime::IMMEDIATE, OscTime::new(0, 1));
        assert_eq!(OscTime::IMMEDIATE.to_string(), "immediate");
    }
}
