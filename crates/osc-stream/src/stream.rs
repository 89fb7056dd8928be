// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Duplex OSC stream over a WebSocket connection.
//!
//! [`OscStream::connect`] starts connecting immediately and hands back a
//! readable half (a `futures::Stream` of packets) and a writable half.
//! Both halves share one socket, owned by a driver task, and one
//! [`StreamState`].
//!
//! # Backlog
//!
//! A socket cannot be paused, and dropping OSC traffic silently is worse
//! than buffering it, so inbound packets are queued without bound until
//! the readable half consumes them. The queue depth is exposed through
//! [`OscReadable::backlog`] and [`OscReadable::is_backpressured`]; the
//! first crossing of the high-water mark in each excursion is logged.

use futures::{SinkExt, Stream, StreamExt};
use osc_wire::{EncodeError, OscPacket};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default backlog size above which the readable reports back-pressure.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1024;

const COMMAND_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 16;

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    pub host: String,
    pub port: u16,
    /// Backlog size above which [`OscReadable::is_backpressured`] is true.
    pub high_water_mark: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

impl StreamOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the back-pressure threshold.
    pub fn high_water_mark(mut self, items: usize) -> Self {
        self.high_water_mark = items;
        self
    }

    /// WebSocket URL for these options.
    pub fn url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("ws://[{}]:{}/", self.host, self.port)
        } else {
            format!("ws://{}:{}/", self.host, self.port)
        }
    }
}

/// Lifecycle shared by both halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Connection attempt in progress.
    Pending,
    Open,
    /// Close frame sent, waiting for the peer.
    Closing,
    Closed,
    Errored,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Stream errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    Transport(String),

    #[error("Stream closed")]
    Closed,

    #[error("Connection closed by peer")]
    Disconnected,

    #[error("Stream aborted: {0}")]
    Aborted(String),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Stream cancelled before it opened")]
    Cancelled,
}

/// Lifecycle signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Opened,
    Closed,
    Error(StreamError),
}

enum Command {
    Write {
        payload: Vec<u8>,
        done: oneshot::Sender<Result<(), StreamError>>,
    },
    Close {
        done: oneshot::Sender<Result<(), StreamError>>,
    },
}

type Inbound = Result<OscPacket, StreamError>;

struct Inner {
    url: String,
    high_water: usize,
    state: watch::Sender<StreamState>,
    events: broadcast::Sender<StreamEvent>,
    failure: OnceLock<StreamError>,
    cancel: CancellationToken,
    abort: CancellationToken,
    backlog: AtomicUsize,
    backpressured: AtomicBool,
}

impl Inner {
    fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    fn transition(&self, from: StreamState, to: StreamState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Enter a terminal state unless already in one.
    fn settle(&self, to: StreamState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = to;
                true
            }
        })
    }

    fn emit(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }

    /// Error reported to callers once the stream has stopped.
    fn terminal_error(&self) -> StreamError {
        self.failure.get().cloned().unwrap_or(StreamError::Closed)
    }

    async fn opened(&self) -> Result<(), StreamError> {
        let mut state = self.state.subscribe();
        let current = state
            .wait_for(|s| *s != StreamState::Pending)
            .await
            .map(|s| *s)
            .unwrap_or_else(|_| self.state());
        if current == StreamState::Open {
            Ok(())
        } else {
            Err(self.terminal_error())
        }
    }

    fn push_backlog(&self) {
        let depth = self.backlog.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > self.high_water && !self.backpressured.swap(true, Ordering::SeqCst) {
            warn!(
                "OSC stream {}: {} packets waiting to be read (high-water mark {})",
                self.url, depth, self.high_water
            );
        }
    }

    fn pop_backlog(&self) {
        // cancel() may have reset the counter under us.
        let depth = self
            .backlog
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .map_or(0, |n| n.saturating_sub(1));
        if depth <= self.high_water && self.backpressured.swap(false, Ordering::SeqCst) {
            debug!("OSC stream {}: backlog drained to {}", self.url, depth);
        }
    }
}

/// A connected (or connecting) OSC stream.
pub struct OscStream {
    pub readable: OscReadable,
    pub writable: OscWritable,
}

impl OscStream {
    /// Start connecting to `ws://host:port/`.
    ///
    /// Returns immediately; the connection is driven by a task spawned on
    /// the current Tokio runtime. Must be called from within a runtime.
    pub fn connect(options: StreamOptions) -> Self {
        let url = options.url();
        let (state, _) = watch::channel(StreamState::Pending);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            url,
            high_water: options.high_water_mark,
            state,
            events,
            failure: OnceLock::new(),
            cancel: CancellationToken::new(),
            abort: CancellationToken::new(),
            backlog: AtomicUsize::new(0),
            backpressured: AtomicBool::new(false),
        });

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        debug!("OSC stream connecting to {}", inner.url);
        tokio::spawn(drive(Arc::clone(&inner), inbound_tx, command_rx));

        Self {
            readable: OscReadable {
                inner: Arc::clone(&inner),
                inbound: inbound_rx,
                finished: false,
            },
            writable: OscWritable {
                inner,
                commands: command_tx,
            },
        }
    }

    pub fn into_split(self) -> (OscReadable, OscWritable) {
        (self.readable, self.writable)
    }
}

/// Readable half: inbound packets in arrival order.
///
/// Ends with `None` when the socket closes. A transport failure or an
/// abort is yielded once as `Err` before the end. Not restartable.
///
/// A close the writable half did not request leaves the stream
/// `Errored` with [`StreamError::Disconnected`], so writes fail and
/// subscribers see the connection was lost.
pub struct OscReadable {
    inner: Arc<Inner>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    finished: bool,
}

impl OscReadable {
    pub fn state(&self) -> StreamState {
        self.inner.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the connection attempt settles.
    pub async fn opened(&self) -> Result<(), StreamError> {
        self.inner.opened().await
    }

    /// Packets received but not yet read.
    pub fn backlog(&self) -> usize {
        self.inner.backlog.load(Ordering::SeqCst)
    }

    /// Whether the backlog is above the high-water mark.
    pub fn is_backpressured(&self) -> bool {
        self.backlog() > self.inner.high_water
    }

    /// Stop reading and close the shared socket.
    ///
    /// The writable half rejects every later write.
    pub fn cancel(&mut self) {
        if !self.finished {
            debug!("OSC stream {} cancelled by reader", self.inner.url);
        }
        self.finished = true;
        self.inbound.close();
        self.inner.backlog.store(0, Ordering::SeqCst);
        self.inner.backpressured.store(false, Ordering::SeqCst);
        self.inner.cancel.cancel();
    }
}

impl Stream for OscReadable {
    type Item = Inbound;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.inbound.poll_recv(cx) {
            Poll::Ready(Some(Ok(packet))) => {
                self.inner.pop_backlog();
                Poll::Ready(Some(Ok(packet)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for OscReadable {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// Writable half: one binary frame per packet.
pub struct OscWritable {
    inner: Arc<Inner>,
    commands: mpsc::Sender<Command>,
}

impl OscWritable {
    pub fn state(&self) -> StreamState {
        self.inner.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the connection attempt settles.
    pub async fn opened(&self) -> Result<(), StreamError> {
        self.inner.opened().await
    }

    /// Send one packet, resolving once the frame was flushed.
    ///
    /// Waits for the connection if it is still pending.
    pub async fn write(&mut self, packet: &OscPacket) -> Result<(), StreamError> {
        self.inner.opened().await?;
        let payload = osc_wire::encode(packet)?;
        self.request(|done| Command::Write { payload, done }).await
    }

    /// Close gracefully once prior writes are done.
    ///
    /// Resolves when the peer acknowledged the close.
    pub async fn close(self) -> Result<(), StreamError> {
        if let Err(e) = self.inner.opened().await {
            return match self.inner.state() {
                StreamState::Closed => Ok(()),
                _ => Err(e),
            };
        }
        self.request(|done| Command::Close { done }).await
    }

    /// Drop the socket now, discarding anything queued.
    ///
    /// The readable half yields `Err(StreamError::Aborted(reason))`.
    pub fn abort(self, reason: impl Into<String>) {
        if self.inner.state().is_terminal() {
            return;
        }
        let _ = self.inner.failure.set(StreamError::Aborted(reason.into()));
        self.inner.settle(StreamState::Errored);
        self.inner.abort.cancel();
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<(), StreamError>>) -> Command,
    ) -> Result<(), StreamError> {
        let (done, result) = oneshot::channel();
        self.commands
            .send(command(done))
            .await
            .map_err(|_| self.inner.terminal_error())?;
        result.await.map_err(|_| self.inner.terminal_error())?
    }
}

enum Ending {
    PeerClosed,
    Cancelled,
    Aborted,
    Failed(StreamError),
}

/// Own the socket: connect, then multiplex inbound frames and write commands.
async fn drive(
    inner: Arc<Inner>,
    inbound: mpsc::UnboundedSender<Inbound>,
    mut commands: mpsc::Receiver<Command>,
) {
    let connected = tokio::select! {
        biased;
        _ = inner.abort.cancelled() => {
            finish(&inner, &inbound, Ending::Aborted, None);
            return;
        }
        _ = inner.cancel.cancelled() => {
            let _ = inner.failure.set(StreamError::Cancelled);
            finish(&inner, &inbound, Ending::Cancelled, None);
            return;
        }
        res = tokio_tungstenite::connect_async(inner.url.as_str()) => res,
    };

    let mut ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let err = StreamError::Connect(e.to_string());
            finish(&inner, &inbound, Ending::Failed(err), None);
            return;
        }
    };

    if !inner.transition(StreamState::Pending, StreamState::Open) {
        // Aborted while the handshake completed.
        finish(&inner, &inbound, Ending::Aborted, None);
        return;
    }
    info!("OSC stream connected to {}", inner.url);
    inner.emit(StreamEvent::Opened);

    let mut closing = None;
    let mut accepting = true;

    let ending = loop {
        tokio::select! {
            biased;
            _ = inner.abort.cancelled() => break Ending::Aborted,
            _ = inner.cancel.cancelled() => {
                if let Err(e) = ws.close(None).await {
                    debug!("OSC stream {}: close on cancel failed: {}", inner.url, e);
                }
                break Ending::Cancelled;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Binary(data))) => match osc_wire::decode(&data) {
                    Ok(packet) => {
                        debug!("OSC stream {} <- {}", inner.url, packet);
                        inner.push_backlog();
                        if inbound.send(Ok(packet)).is_err() {
                            inner.pop_backlog();
                        }
                    }
                    Err(e) => warn!(
                        "OSC stream {}: dropping malformed frame ({} bytes): {}",
                        inner.url,
                        data.len(),
                        e
                    ),
                },
                Some(Ok(Message::Text(_))) => {
                    warn!("OSC stream {}: ignoring text frame", inner.url);
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("OSC stream {}: close frame {:?}", inner.url, frame);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Ending::Failed(StreamError::Transport(e.to_string())),
                None => break Ending::PeerClosed,
            },
            cmd = commands.recv(), if accepting => match cmd {
                Some(Command::Write { payload, done }) => {
                    if let Err(e) = ws.send(Message::Binary(payload)).await {
                        let err = StreamError::Transport(e.to_string());
                        let _ = done.send(Err(err.clone()));
                        break Ending::Failed(err);
                    }
                    let _ = done.send(Ok(()));
                }
                Some(Command::Close { done }) => {
                    accepting = false;
                    inner.transition(StreamState::Open, StreamState::Closing);
                    debug!("OSC stream {}: closing", inner.url);
                    if let Err(e) = ws.close(None).await {
                        let err = StreamError::Transport(e.to_string());
                        let _ = done.send(Err(err.clone()));
                        break Ending::Failed(err);
                    }
                    closing = Some(done);
                }
                None => accepting = false,
            },
        }
    };

    drop(ws);
    finish(&inner, &inbound, ending, closing);
}

fn finish(
    inner: &Inner,
    inbound: &mpsc::UnboundedSender<Inbound>,
    ending: Ending,
    closing: Option<oneshot::Sender<Result<(), StreamError>>>,
) {
    match ending {
        Ending::PeerClosed => match closing {
            Some(done) => {
                inner.settle(StreamState::Closed);
                info!("OSC stream {} closed", inner.url);
                let _ = done.send(Ok(()));
                inner.emit(StreamEvent::Closed);
            }
            None => {
                let _ = inner.failure.set(StreamError::Disconnected);
                inner.settle(StreamState::Errored);
                warn!("OSC stream {} closed by peer", inner.url);
                inner.emit(StreamEvent::Error(StreamError::Disconnected));
            }
        },
        Ending::Cancelled => {
            inner.settle(StreamState::Closed);
            info!("OSC stream {} cancelled", inner.url);
            if let Some(done) = closing {
                let _ = done.send(Ok(()));
            }
            inner.emit(StreamEvent::Closed);
        }
        Ending::Aborted => {
            inner.settle(StreamState::Errored);
            let err = inner.terminal_error();
            warn!("OSC stream {}: {}", inner.url, err);
            let _ = inbound.send(Err(err.clone()));
            if let Some(done) = closing {
                let _ = done.send(Err(err.clone()));
            }
            inner.emit(StreamEvent::Error(err));
        }
        Ending::Failed(err) => {
            let _ = inner.failure.set(err.clone());
            inner.settle(StreamState::Errored);
            error!("OSC stream {}: {}", inner.url, err);
            let _ = inbound.send(Err(err.clone()));
            if let Some(done) = closing {
                let _ = done.send(Err(err.clone()));
            }
            inner.emit(StreamEvent::Error(err));
        }
    }
}
