// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay lifecycle state.

use std::fmt;

/// Lifecycle of a [`crate::Relay`].
///
/// ```text
/// Idle -> Opening -> Open -> Closing -> Closed
///            |         |                  |
///            +----> Failed <--------------+ (re-open)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelayState {
    /// Built, never opened.
    #[default]
    Idle,
    /// Transports are being bound.
    Opening,
    /// Both transports ready, traffic flows.
    Open,
    /// Teardown in progress.
    Closing,
    /// Torn down after `close()`.
    Closed,
    /// Stopped because a transport failed.
    Failed,
}

impl RelayState {
    /// Whether `open()` may start from this state.
    pub fn can_open(self) -> bool {
        matches!(self, Self::Idle | Self::Closed | Self::Failed)
    }

    /// Whether the relay holds no running transports.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Operator-facing description.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Idle => "not started",
            Self::Opening => "waiting to connect",
            Self::Open => "actively relaying",
            Self::Closing => "stopping",
            Self::Closed => "stopped",
            Self::Failed => "stopped due to error",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
