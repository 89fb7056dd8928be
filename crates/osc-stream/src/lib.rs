// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC over a WebSocket bridge, as a pair of async streams.
//!
//! Connect to an `osc-bridge` WebSocket endpoint, read the packets it
//! forwards from its UDP controller, and write packets back to it.
//!
//! ```no_run
//! use osc_stream::{pipe_to, OscStream, RetentionBuffer, StreamOptions};
//!
//! # async fn run() -> Result<(), osc_stream::StreamError> {
//! let OscStream { mut readable, .. } = OscStream::connect(StreamOptions::new("localhost", 8080));
//! let mut last: RetentionBuffer<String> = RetentionBuffer::new(10);
//! let total = pipe_to(&mut readable, &mut last).await?;
//! for (n, line) in last.numbered() {
//!     println!("{}: {}", n, line);
//! }
//! println!("{} messages received", total);
//! # Ok(())
//! # }
//! ```

pub mod retention;
pub mod stream;

pub use retention::{normalize_take, pipe_to, OscConsumer, RetentionBuffer, DEFAULT_TAKE};
pub use stream::{
    OscReadable, OscStream, OscWritable, StreamError, StreamEvent, StreamOptions, StreamState,
    DEFAULT_HIGH_WATER_MARK,
};
