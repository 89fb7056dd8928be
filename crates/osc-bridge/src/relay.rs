// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core relay implementation.
//!
//! A [`Relay`] owns one UDP socket (listening for the controller and
//! sending to its configured peer) and one WebSocket server. Datagrams
//! are validated and fanned out to every connected WebSocket client;
//! binary frames from clients are validated and sent to the UDP peer.
//!
//! Lifecycle changes are published on a [`RelayEvent`] broadcast channel
//! and on a `watch` channel of [`RelayState`]. Transport errors never
//! unwind out of the background tasks: decode and send failures are
//! logged and counted, open/runtime failures are surfaced as events.

use crate::config::{BridgeConfig, ConfigError};
use crate::heartbeat;
use crate::net;
use crate::session::{self, SessionContext};
use crate::state::RelayState;
use crate::stats::{RelayStats, RelayStatsSnapshot};
use osc_wire::{DecodeError, EncodeError, OscPacket};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

/// The two transports of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    WebSocket,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => f.write_str("UDP"),
            Self::WebSocket => f.write_str("WebSocket"),
        }
    }
}

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{transport} transport failed to open: {source}")]
    TransportOpen {
        transport: Transport,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("{transport} transport error: {message}")]
    TransportRuntime { transport: Transport, message: String },

    #[error("Send to {destination} failed: {source}")]
    SendFailure {
        destination: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Relay not open")]
    NotOpen,

    #[error("Relay already open")]
    AlreadyOpen,

    #[error("Relay open cancelled by close()")]
    Cancelled,
}

/// Lifecycle signal surfaced to the owning process.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// Both transports are ready.
    Opened(BoundAddrs),
    /// Transports released. Emitted once per open.
    Closed,
    /// Open or runtime transport failure. Emitted once per occurrence.
    Error(Arc<RelayError>),
}

/// Local addresses the relay actually bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddrs {
    /// UDP listen address.
    pub udp: SocketAddr,
    /// UDP peer that WebSocket traffic is sent to.
    pub remote: SocketAddr,
    /// WebSocket listen address.
    pub ws: SocketAddr,
}

/// State shared between the relay handle and its tasks.
pub(crate) struct Shared {
    pub(crate) name: String,
    state: watch::Sender<RelayState>,
    events: broadcast::Sender<RelayEvent>,
    outbound: broadcast::Sender<Vec<u8>>,
    pub(crate) stats: RelayStats,
    pub(crate) clients: AtomicUsize,
    closed_emitted: AtomicBool,
    opening: Mutex<Option<CancellationToken>>,
    bound: Mutex<Option<BoundAddrs>>,
}

impl Shared {
    pub(crate) fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Atomically move `from -> to`; false if the state was not `from`.
    pub(crate) fn transition(&self, from: RelayState, to: RelayState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!("Relay '{}': {} -> {}", self.name, from, to);
        }
        changed
    }

    fn begin_open(&self) -> Result<RelayState, RelayError> {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if state.can_open() {
                previous = Some(*state);
                *state = RelayState::Opening;
                true
            } else {
                false
            }
        });
        previous.ok_or(RelayError::AlreadyOpen)
    }

    pub(crate) fn emit(&self, event: RelayEvent) {
        // No subscriber is fine: signals are advisory.
        let _ = self.events.send(event);
    }

    fn emit_closed_once(&self) {
        if !self.closed_emitted.swap(true, Ordering::SeqCst) {
            self.emit(RelayEvent::Closed);
        }
    }

    pub(crate) fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe_outbound(&self) -> broadcast::Receiver<Vec<u8>> {
        self.outbound.subscribe()
    }

    /// Hand an encoded packet to every connected WebSocket client.
    ///
    /// Returns false when no client is connected.
    pub(crate) fn forward_to_ws(&self, payload: Vec<u8>) -> bool {
        match self.outbound.send(payload) {
            Ok(_) => true,
            Err(_) => {
                debug!("Relay '{}': no WebSocket client connected", self.name);
                false
            }
        }
    }

    /// Inject a packet towards the WebSocket clients.
    pub(crate) fn send_packet(&self, packet: &OscPacket) -> Result<bool, RelayError> {
        if self.state() != RelayState::Open {
            return Err(RelayError::NotOpen);
        }
        let payload = osc_wire::encode(packet)?;
        Ok(self.forward_to_ws(payload))
    }

    fn fail_open(&self, err: RelayError) {
        if self.transition(RelayState::Opening, RelayState::Failed) {
            error!("Relay '{}' failed to open: {}", self.name, err);
            // Never opened: there is nothing to report as closed.
            self.closed_emitted.store(true, Ordering::SeqCst);
            self.emit(RelayEvent::Error(Arc::new(err)));
        } else {
            warn!("Relay '{}' open failed while closing: {}", self.name, err);
            self.finish_cancelled_open();
        }
    }

    fn finish_cancelled_open(&self) {
        self.transition(RelayState::Closing, RelayState::Closed);
        self.emit_closed_once();
        info!("Relay '{}' open cancelled", self.name);
    }
}

/// Tasks of one open relay.
struct Runtime {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    #[cfg(test)]
    failures: mpsc::UnboundedSender<RelayError>,
}

impl Runtime {
    async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Relay task panicked: {}", e);
                }
            }
        }
    }
}

struct BoundTransports {
    udp: UdpSocket,
    listener: TcpListener,
    addrs: BoundAddrs,
}

/// OSC UDP <-> WebSocket relay.
pub struct Relay {
    config: Arc<BridgeConfig>,
    shared: Arc<Shared>,
    runtime: tokio::sync::Mutex<Option<Runtime>>,
}

impl Relay {
    /// Create a relay from configuration. Nothing is bound until [`Relay::open`].
    pub fn new(config: BridgeConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let (state, _) = watch::channel(RelayState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outbound, _) = broadcast::channel(config.channel_capacity);

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            state,
            events,
            outbound,
            stats: RelayStats::new(),
            clients: AtomicUsize::new(0),
            closed_emitted: AtomicBool::new(false),
            opening: Mutex::new(None),
            bound: Mutex::new(None),
        });

        Ok(Self {
            config: Arc::new(config),
            shared,
            runtime: tokio::sync::Mutex::new(None),
        })
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        self.shared.state()
    }

    /// Observe state changes.
    pub fn watch_state(&self) -> watch::Receiver<RelayState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.shared.events.subscribe()
    }

    /// Get relay statistics.
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of connected WebSocket clients.
    pub fn client_count(&self) -> usize {
        self.shared.client_count()
    }

    /// Addresses bound by the current run, if open.
    pub fn bound_addrs(&self) -> Option<BoundAddrs> {
        *self.shared.bound.lock()
    }

    /// Bind both transports and start relaying.
    ///
    /// The relay is `Opening` until both the UDP socket and the WebSocket
    /// listener are ready, then `Open`. If either fails, the other is
    /// dropped, the relay becomes `Failed` and an [`RelayEvent::Error`]
    /// is emitted. Re-opening a `Closed` or `Failed` relay restarts it.
    pub async fn open(&self) -> Result<BoundAddrs, RelayError> {
        let previous = self.shared.begin_open()?;

        // Tasks of a failed run may still be winding down.
        if let Some(stale) = self.runtime.lock().await.take() {
            stale.shutdown().await;
        }
        self.shared.closed_emitted.store(false, Ordering::SeqCst);

        let open_cancel = CancellationToken::new();
        *self.shared.opening.lock() = Some(open_cancel.clone());

        info!(
            "Relay '{}' opening (was {}): UDP {} <-> ws://{}",
            self.config.name,
            previous,
            self.config.udp_server.display_addr(),
            self.config.ws_server.display_addr()
        );

        let bound = tokio::select! {
            biased;
            _ = open_cancel.cancelled() => None,
            res = self.bind_transports() => Some(res),
        };
        self.shared.opening.lock().take();

        let transports = match bound {
            None => {
                self.shared.finish_cancelled_open();
                return Err(RelayError::Cancelled);
            }
            Some(Err((transport, source))) => {
                let source = Arc::new(source);
                self.shared.fail_open(RelayError::TransportOpen {
                    transport,
                    source: Arc::clone(&source),
                });
                return Err(RelayError::TransportOpen { transport, source });
            }
            Some(Ok(transports)) => transports,
        };

        let mut slot = self.runtime.lock().await;
        if !self.shared.transition(RelayState::Opening, RelayState::Open) {
            drop(transports);
            self.shared.finish_cancelled_open();
            return Err(RelayError::Cancelled);
        }

        let addrs = transports.addrs;
        *slot = Some(self.start(transports));
        *self.shared.bound.lock() = Some(addrs);

        info!(
            "Relay '{}' open: UDP {} -> {}, WebSocket ws://{}",
            self.config.name, addrs.udp, addrs.remote, addrs.ws
        );
        self.shared.emit(RelayEvent::Opened(addrs));

        Ok(addrs)
    }

    /// Bind UDP (and resolve its peer) and the WebSocket listener concurrently.
    async fn bind_transports(&self) -> Result<BoundTransports, (Transport, io::Error)> {
        let udp = async {
            let socket = net::bind_udp(&self.config.udp_server).await?;
            let local = socket.local_addr()?;
            let remote = net::resolve_remote(&self.config.udp_client, local).await?;
            Ok::<_, io::Error>((socket, local, remote))
        };
        let ws = async {
            let listener = net::bind_ws(&self.config.ws_server).await?;
            let local = listener.local_addr()?;
            Ok::<_, io::Error>((listener, local))
        };

        let (udp, ws) = tokio::join!(udp, ws);
        let (udp, udp_local, remote) = udp.map_err(|e| (Transport::Udp, e))?;
        let (listener, ws_local) = ws.map_err(|e| (Transport::WebSocket, e))?;

        Ok(BoundTransports {
            udp,
            listener,
            addrs: BoundAddrs {
                udp: udp_local,
                remote,
                ws: ws_local,
            },
        })
    }

    fn start(&self, transports: BoundTransports) -> Runtime {
        let cancel = CancellationToken::new();
        let (fail_tx, fail_rx) = mpsc::unbounded_channel();
        let (udp_tx, udp_rx) = mpsc::channel(self.config.channel_capacity);
        let udp = Arc::new(transports.udp);
        let mut tasks = Vec::with_capacity(5);

        tasks.push(tokio::spawn(pump_udp_to_ws(
            Arc::clone(&udp),
            Arc::clone(&self.shared),
            cancel.clone(),
            fail_tx.clone(),
        )));

        tasks.push(tokio::spawn(udp_writer(
            udp,
            transports.addrs.remote,
            udp_rx,
            Arc::clone(&self.shared),
            cancel.clone(),
        )));

        let ctx = Arc::new(SessionContext {
            shared: Arc::clone(&self.shared),
            udp_out: udp_tx,
            cancel: cancel.clone(),
            max_clients: self.config.ws_server.max_clients,
        });
        tasks.push(tokio::spawn(session::serve(
            transports.listener,
            ctx,
            fail_tx.clone(),
        )));

        if self.config.heartbeat.enabled {
            tasks.push(tokio::spawn(heartbeat::run(
                Arc::clone(&self.shared),
                self.config.heartbeat.interval(),
                cancel.clone(),
            )));
        }

        tasks.push(tokio::spawn(supervise(
            Arc::clone(&self.shared),
            cancel.clone(),
            fail_rx,
        )));

        Runtime {
            cancel,
            tasks,
            #[cfg(test)]
            failures: fail_tx,
        }
    }

    /// Send a packet to every connected WebSocket client.
    ///
    /// Only valid while `Open`. Returns whether at least one client was
    /// connected to receive it.
    pub fn send(&self, packet: &OscPacket) -> Result<bool, RelayError> {
        self.shared.send_packet(packet)
    }

    /// Stop relaying and release both transports.
    ///
    /// Idempotent: a second call on a closed relay does nothing and does
    /// not emit another [`RelayEvent::Closed`]. A `Failed` relay stays
    /// `Failed` so operators can tell an error stop from a requested one.
    pub async fn close(&self) {
        loop {
            match self.state() {
                RelayState::Idle | RelayState::Closed => {
                    debug!("Relay '{}' already closed", self.config.name);
                    return;
                }
                RelayState::Opening => {
                    if self
                        .shared
                        .transition(RelayState::Opening, RelayState::Closing)
                    {
                        if let Some(token) = self.shared.opening.lock().as_ref() {
                            token.cancel();
                        }
                    }
                }
                RelayState::Closing => {
                    let mut state = self.watch_state();
                    let _ = state.wait_for(|s| *s != RelayState::Closing).await;
                    return;
                }
                RelayState::Open => {
                    if !self.shared.transition(RelayState::Open, RelayState::Closing) {
                        continue;
                    }
                    info!("Relay '{}' closing", self.config.name);
                    self.teardown().await;
                    self.shared.bound.lock().take();
                    self.shared
                        .transition(RelayState::Closing, RelayState::Closed);
                    self.shared.emit_closed_once();
                    info!("Relay '{}' closed", self.config.name);
                    return;
                }
                RelayState::Failed => {
                    self.teardown().await;
                    self.shared.bound.lock().take();
                    self.shared.emit_closed_once();
                    return;
                }
            }
        }
    }

    /// Wait until the relay is `Closed` or `Failed`.
    pub async fn stopped(&self) -> RelayState {
        let mut state = self.watch_state();
        state
            .wait_for(|s| s.is_terminal())
            .await
            .map(|s| *s)
            .unwrap_or_else(|_| self.state())
    }

    /// Report a runtime transport failure as a background task would.
    #[cfg(test)]
    async fn inject_failure(&self, err: RelayError) -> bool {
        match self.runtime.lock().await.as_ref() {
            Some(runtime) => runtime.failures.send(err).is_ok(),
            None => false,
        }
    }

    async fn teardown(&self) {
        let runtime = self.runtime.lock().await.take();
        if let Some(runtime) = runtime {
            runtime.shutdown().await;
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.runtime.try_lock() {
            if let Some(runtime) = slot.take() {
                runtime.cancel.cancel();
            }
        }
    }
}

/// Forward validated datagrams to the WebSocket clients, in arrival order.
async fn pump_udp_to_ws(
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    failures: mpsc::UnboundedSender<RelayError>,
) {
    let stats = &shared.stats.udp_to_ws;
    let mut buf = vec![0u8; net::MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = socket.recv_from(&mut buf) => res,
        };

        let (len, from) = match received {
            Ok(r) => r,
            Err(e) if net::is_transient_recv_error(&e) => {
                stats.record_error();
                warn!("UDP receive reported a failed send: {}", e);
                continue;
            }
            Err(e) => {
                let _ = failures.send(RelayError::TransportRuntime {
                    transport: Transport::Udp,
                    message: e.to_string(),
                });
                break;
            }
        };

        let payload = &buf[..len];
        match osc_wire::decode(payload) {
            Ok(packet) => {
                debug!(
                    "UDP {} -> WS ({} message(s)): {}",
                    from,
                    packet.message_count(),
                    packet
                );
                if shared.forward_to_ws(payload.to_vec()) {
                    stats.record_message(len as u64);
                } else {
                    stats.record_dropped();
                }
            }
            Err(e) => {
                stats.record_dropped();
                warn!("Dropping malformed datagram from {} ({} bytes): {}", from, len, e);
            }
        }
    }

    debug!("UDP receive pump stopped");
}

/// Send WebSocket-origin packets to the UDP peer, in arrival order.
async fn udp_writer(
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    mut queue: mpsc::Receiver<Vec<u8>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let stats = &shared.stats.ws_to_udp;

    loop {
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            p = queue.recv() => match p {
                Some(p) => p,
                None => break,
            },
        };

        match socket.send_to(&payload, remote).await {
            Ok(_) => stats.record_message(payload.len() as u64),
            Err(source) => {
                stats.record_error();
                let err = RelayError::SendFailure {
                    destination: remote,
                    source,
                };
                warn!("{}", err);
            }
        }
    }

    debug!("UDP writer stopped");
}

/// Turn the first runtime transport error into `Failed` + teardown.
async fn supervise(
    shared: Arc<Shared>,
    cancel: CancellationToken,
    mut failures: mpsc::UnboundedReceiver<RelayError>,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        Some(err) = failures.recv() => {
            if shared.transition(RelayState::Open, RelayState::Failed) {
                error!("Relay '{}' failed: {}", shared.name, err);
                shared.emit(RelayEvent::Error(Arc::new(err)));
                cancel.cancel();
                shared.bound.lock().take();
                shared.emit_closed_once();
            } else {
                warn!("Relay '{}' transport error while stopping: {}", shared.name, err);
                cancel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osc_wire::OscMessage;

    fn loopback_relay() -> Relay {
        Relay::new(BridgeConfig::loopback(9)).expect("create relay")
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = BridgeConfig::default();
        config.channel_capacity = 0;
        assert!(matches!(Relay::new(config), Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let relay = loopback_relay();
        let packet = OscPacket::Message(OscMessage::new("/x", vec![]).unwrap());
        assert!(matches!(relay.send(&packet), Err(RelayError::NotOpen)));
    }

    #[tokio::test]
    async fn test_open_close_lifecycle() {
        let relay = loopback_relay();
        let mut events = relay.subscribe();
        assert_eq!(relay.state(), RelayState::Idle);

        let addrs = relay.open().await.expect("open");
        assert_eq!(relay.state(), RelayState::Open);
        assert_ne!(addrs.udp.port(), 0);
        assert_ne!(addrs.ws.port(), 0);
        assert_eq!(relay.bound_addrs(), Some(addrs));
        assert!(matches!(relay.open().await, Err(RelayError::AlreadyOpen)));

        relay.close().await;
        assert_eq!(relay.state(), RelayState::Closed);
        assert_eq!(relay.bound_addrs(), None);

        assert!(matches!(events.recv().await, Ok(RelayEvent::Opened(_))));
        assert!(matches!(events.recv().await, Ok(RelayEvent::Closed)));
    }

    #[tokio::test]
    async fn test_close_on_idle_is_noop() {
        let relay = loopback_relay();
        let mut events = relay.subscribe();
        relay.close().await;
        assert_eq!(relay.state(), RelayState::Idle);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reopen_after_close() {
        let relay = loopback_relay();
        relay.open().await.expect("open");
        relay.close().await;
        relay.open().await.expect("reopen");
        assert_eq!(relay.state(), RelayState::Open);
        relay.close().await;
        assert_eq!(relay.stopped().await, RelayState::Closed);
    }

    #[tokio::test]
    async fn test_runtime_failure_fails_relay_once() {
        let relay = loopback_relay();
        let mut states = relay.watch_state();
        let mut events = relay.subscribe();
        relay.open().await.expect("open");
        assert_eq!(*states.borrow_and_update(), RelayState::Open);

        assert!(
            relay
                .inject_failure(RelayError::TransportRuntime {
                    transport: Transport::Udp,
                    message: "socket gone".into(),
                })
                .await
        );
        states.changed().await.expect("state change");
        assert_eq!(*states.borrow_and_update(), RelayState::Failed);
        assert_eq!(relay.stopped().await, RelayState::Failed);

        relay.close().await;
        relay.close().await;
        assert_eq!(relay.state(), RelayState::Failed);
        assert_eq!(relay.bound_addrs(), None);
        assert!(matches!(
            relay.send(&OscPacket::Message(OscMessage::new("/x", vec![]).unwrap())),
            Err(RelayError::NotOpen)
        ));

        assert!(matches!(events.recv().await, Ok(RelayEvent::Opened(_))));
        match events.recv().await {
            Ok(RelayEvent::Error(err)) => assert!(matches!(
                *err,
                RelayError::TransportRuntime {
                    transport: Transport::Udp,
                    ..
                }
            )),
            other => panic!("expected error event, got {:?}", other),
        }
        assert!(matches!(events.recv().await, Ok(RelayEvent::Closed)));
        assert!(events.try_recv().is_err());

        // A failed relay can be opened again.
        relay.open().await.expect("reopen");
        assert_eq!(relay.state(), RelayState::Open);
        relay.close().await;
        assert_eq!(relay.state(), RelayState::Closed);
    }
}
