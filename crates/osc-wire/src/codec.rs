// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary OSC codec.
//!
//! Wire layout is delegated to `rosc`; this module maps between its
//! packet model and the validated types in [`crate::message`].

use rosc::{OscType, decoder, encoder};

use crate::error::{DecodeError, EncodeError};
use crate::message::{OscArg, OscBundle, OscMessage, OscPacket};

/// Decode one OSC packet (message or bundle) from a datagram / frame.
pub fn decode(bytes: &[u8]) -> Result<OscPacket, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let (rest, packet) =
        decoder::decode_udp(bytes).map_err(|e| DecodeError::Malformed(format!("{:?}", e)))?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes(rest.len()));
    }
    from_rosc(packet)
}

/// Encode one OSC packet into its binary wire form.
pub fn encode(packet: &OscPacket) -> Result<Vec<u8>, EncodeError> {
    encoder::encode(&to_rosc(packet)).map_err(|e| EncodeError::Codec(format!("{:?}", e)))
}

fn from_rosc(packet: rosc::OscPacket) -> Result<OscPacket, DecodeError> {
    match packet {
        rosc::OscPacket::Message(msg) => {
            let args = msg
                .args
                .into_iter()
                .map(arg_from_rosc)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(OscPacket::Message(OscMessage::new(msg.addr, args)?))
        }
        rosc::OscPacket::Bundle(bundle) => {
            let content = bundle
                .content
                .into_iter()
                .map(from_rosc)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(OscPacket::Bundle(OscBundle {
                time: bundle.timetag.into(),
                content,
            }))
        }
    }
}

fn to_rosc(packet: &OscPacket) -> rosc::OscPacket {
    match packet {
        OscPacket::Message(msg) => rosc::OscPacket::Message(rosc::OscMessage {
            addr: msg.address().to_string(),
            args: msg.args().iter().map(arg_to_rosc).collect(),
        }),
        OscPacket::Bundle(bundle) => rosc::OscPacket::Bundle(rosc::OscBundle {
            timetag: bundle.time.into(),
            content: bundle.content.iter().map(to_rosc).collect(),
        }),
    }
}

fn arg_from_rosc(arg: OscType) -> Result<OscArg, DecodeError> {
    Ok(match arg {
        OscType::Int(v) => OscArg::Int(v),
        OscType::Float(v) => OscArg::Float(v),
        OscType::String(v) => OscArg::String(v),
        OscType::Blob(v) => OscArg::Blob(v),
        OscType::Long(v) => OscArg::Long(v),
        OscType::Double(v) => OscArg::Double(v),
        OscType::Bool(v) => OscArg::Bool(v),
        OscType::Nil => OscArg::Nil,
        OscType::Inf => OscArg::Inf,
        OscType::Time(t) => OscArg::Time(t.into()),
        OscType::Char(_) => return Err(DecodeError::UnsupportedArgument("char")),
        OscType::Color(_) => return Err(DecodeError::UnsupportedArgument("color")),
        OscType::Midi(_) => return Err(DecodeError::UnsupportedArgument("midi")),
        OscType::Array(_) => return Err(DecodeError::UnsupportedArgument("array")),
    })
}

fn arg_to_rosc(arg: &OscArg) -> OscType {
    match arg {
        OscArg::Int(v) => OscType::Int(*v),
        OscArg::Float(v) => OscType::Float(*v),
        OscArg::String(v) => OscType::String(v.clone()),
        OscArg::Blob(v) => OscType::Blob(v.clone()),
        OscArg::Long(v) => OscType::Long(*v),
        OscArg::Double(v) => OscType::Double(*v),
        OscArg::Bool(v) => OscType::Bool(*v),
        OscArg::Nil => OscType::Nil,
        OscArg::Inf => OscType::Inf,
        OscArg::Time(t) => OscType::Time((*t).into()),
    }
}
