// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Codec errors.

use thiserror::Error;

/// Invalid message construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("Invalid OSC address pattern: {0:?}")]
    InvalidAddress(String),
}

/// Malformed or unsupported OSC payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty OSC payload")]
    Empty,

    #[error("Malformed OSC payload: {0}")]
    Malformed(String),

    #[error("{0} unexpected bytes after OSC packet")]
    TrailingBytes(usize),

    #[error("Unsupported OSC argument type: {0}")]
    UnsupportedArgument(&'static str),

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Packet could not be serialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("OSC encode failed: {0}")]
    Codec(String),
}
