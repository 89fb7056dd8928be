// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded consumer: keep only the most recent messages.

use crate::stream::StreamError;
use futures::{Stream, StreamExt};
use osc_wire::OscPacket;
use std::collections::VecDeque;
use tracing::{debug, error};

/// Number of messages retained when nothing else is configured.
pub const DEFAULT_TAKE: usize = 50;

/// Sink for packets read from a stream.
pub trait OscConsumer {
    fn on_message(&mut self, packet: OscPacket);

    /// Called once if the source fails.
    fn on_error(&mut self, err: &StreamError) {
        error!("Consumer source failed: {}", err);
    }
}

/// Clamp a requested retention count to a positive integer.
///
/// Non-finite, fractional and sub-1 values all become 1.
pub fn normalize_take(take: f64) -> usize {
    if take.is_finite() && take.fract() == 0.0 && take > 1.0 {
        take as usize
    } else {
        1
    }
}

/// The last N items plus the number ever received.
#[derive(Debug, Clone)]
pub struct RetentionBuffer<T> {
    take: usize,
    items: VecDeque<T>,
    received: u64,
}

impl<T> Default for RetentionBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TAKE)
    }
}

impl<T> RetentionBuffer<T> {
    /// `take` of 0 is treated as 1.
    pub fn new(take: usize) -> Self {
        let take = take.max(1);
        Self {
            take,
            items: VecDeque::with_capacity(take.min(1024)),
            received: 0,
        }
    }

    pub fn take(&self) -> usize {
        self.take
    }

    /// Change the retention count, evicting the oldest items if needed.
    pub fn set_take(&mut self, take: f64) {
        let take = normalize_take(take);
        if take != self.take {
            debug!("Retention changed from {} to {}", self.take, take);
            self.take = take;
            self.evict();
        }
    }

    /// Append the newest item.
    pub fn push(&mut self, item: T) {
        self.received += 1;
        self.items.push_back(item);
        self.evict();
    }

    fn evict(&mut self) {
        while self.items.len() > self.take {
            self.items.pop_front();
        }
    }

    /// Total items ever pushed.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Items pushed but no longer retained.
    pub fn hidden(&self) -> u64 {
        self.received - self.items.len() as u64
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Newest to oldest.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev()
    }

    /// Newest to oldest, paired with each item's 1-based arrival number.
    pub fn numbered(&self) -> impl Iterator<Item = (u64, &T)> {
        let newest = self.received;
        self.iter_newest_first()
            .enumerate()
            .map(move |(i, item)| (newest - i as u64, item))
    }
}

impl OscConsumer for RetentionBuffer<OscPacket> {
    fn on_message(&mut self, packet: OscPacket) {
        self.push(packet);
    }
}

impl OscConsumer for RetentionBuffer<String> {
    fn on_message(&mut self, packet: OscPacket) {
        self.push(packet.to_string());
    }
}

/// Drive `source` into `consumer` until it ends.
///
/// Returns the number of packets delivered, or the first error after
/// passing it to [`OscConsumer::on_error`].
pub async fn pipe_to<S, C>(source: &mut S, consumer: &mut C) -> Result<u64, StreamError>
where
    S: Stream<Item = Result<OscPacket, StreamError>> + Unpin,
    C: OscConsumer + ?Sized,
{
    let mut delivered = 0;
    while let Some(item) = source.next().await {
        match item {
            Ok(packet) => {
                consumer.on_message(packet);
                delivered += 1;
            }
            Err(e) => {
                consumer.on_error(&e);
                return Err(e);
            }
        }
    }
    Ok(delivered)
}
