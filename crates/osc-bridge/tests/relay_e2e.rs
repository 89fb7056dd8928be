// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end relay tests over loopback sockets.

use futures::{SinkExt, StreamExt};
use osc_bridge::{
    BoundAddrs, BridgeConfig, EndpointConfig, HeartbeatConfig, Relay, RelayError, RelayEvent,
    RelayState, RemoteConfig, Transport, WsServerConfig,
};
use osc_wire::{decode, encode, OscArg, OscMessage, OscPacket};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn packet(address: &str, args: Vec<OscArg>) -> OscPacket {
    OscPacket::Message(OscMessage::new(address, args).expect("valid address"))
}

/// A UDP socket standing in for the OSC controller.
async fn controller() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.expect("bind controller")
}

/// Loopback-only bridge on ephemeral ports, forwarding to `remote_port`.
fn loopback_config(remote_port: u16) -> BridgeConfig {
    BridgeConfig {
        udp_server: EndpointConfig::new("127.0.0.1", 0),
        udp_client: RemoteConfig::new("127.0.0.1", remote_port),
        ws_server: WsServerConfig::new("127.0.0.1", 0),
        ..Default::default()
    }
}

async fn open_relay(config: BridgeConfig) -> (Relay, BoundAddrs) {
    let relay = Relay::new(config).expect("create relay");
    let addrs = relay.open().await.expect("open relay");
    (relay, addrs)
}

async fn connect(relay: &Relay, addrs: &BoundAddrs) -> WsClient {
    let expected = relay.client_count() + 1;
    let (ws, _) = connect_async(format!("ws://{}/", addrs.ws))
        .await
        .expect("connect websocket");
    wait_for_clients(relay, expected).await;
    ws
}

async fn wait_for_clients(relay: &Relay, count: usize) {
    timeout(WAIT, async {
        while relay.client_count() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clients registered");
}

/// Next OSC packet from a WebSocket client, skipping control frames.
async fn next_packet(ws: &mut WsClient) -> OscPacket {
    loop {
        let frame = timeout(WAIT, ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Binary(data) = frame {
            return decode(&data).expect("valid OSC");
        }
    }
}

async fn recv_datagram(socket: &UdpSocket) -> OscPacket {
    let mut buf = vec![0u8; 65_535];
    let (len, _) = timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("datagram in time")
        .expect("recv");
    decode(&buf[..len]).expect("valid OSC")
}

#[tokio::test]
async fn test_udp_to_ws_forwarding() {
    let ctrl = controller().await;
    let remote_port = ctrl.local_addr().unwrap().port();
    let (relay, addrs) = open_relay(loopback_config(remote_port)).await;
    let mut ws = connect(&relay, &addrs).await;

    let sent = packet("/fader/1", vec![OscArg::Float(0.75)]);
    ctrl.send_to(&encode(&sent).unwrap(), addrs.udp).await.unwrap();

    assert_eq!(next_packet(&mut ws).await, sent);
    assert_eq!(relay.stats().udp_to_ws.messages_forwarded, 1);

    relay.close().await;
}

#[tokio::test]
async fn test_udp_fan_out_preserves_order() {
    let ctrl = controller().await;
    let remote_port = ctrl.local_addr().unwrap().port();
    let (relay, addrs) = open_relay(loopback_config(remote_port)).await;
    let mut first = connect(&relay, &addrs).await;
    let mut second = connect(&relay, &addrs).await;

    for i in 0..10 {
        let p = packet("/seq", vec![OscArg::Int(i)]);
        ctrl.send_to(&encode(&p).unwrap(), addrs.udp).await.unwrap();
    }

    for ws in [&mut first, &mut second] {
        for i in 0..10 {
            assert_eq!(next_packet(ws).await, packet("/seq", vec![OscArg::Int(i)]));
        }
    }

    relay.close().await;
}

#[tokio::test]
async fn test_ws_to_udp_forwarding() {
    let ctrl = controller().await;
    let remote_port = ctrl.local_addr().unwrap().port();
    let (relay, addrs) = open_relay(loopback_config(remote_port)).await;
    let mut ws = connect(&relay, &addrs).await;

    let sent = packet(
        "/cue/go",
        vec![OscArg::String("intro".into()), OscArg::Int(3)],
    );
    ws.send(Message::Binary(encode(&sent).unwrap())).await.unwrap();

    assert_eq!(recv_datagram(&ctrl).await, sent);

    relay.close().await;
}

#[tokio::test]
async fn test_malformed_datagram_is_dropped() {
    let ctrl = controller().await;
    let remote_port = ctrl.local_addr().unwrap().port();
    let (relay, addrs) = open_relay(loopback_config(remote_port)).await;
    let mut ws = connect(&relay, &addrs).await;

    ctrl.send_to(b"definitely not osc", addrs.udp).await.unwrap();
    let mut trailing = encode(&packet("/padded", vec![OscArg::Int(1)])).unwrap();
    trailing.extend_from_slice(&[0, 0, 0, 0]);
    ctrl.send_to(&trailing, addrs.udp).await.unwrap();
    let valid = packet("/after", vec![]);
    ctrl.send_to(&encode(&valid).unwrap(), addrs.udp).await.unwrap();

    assert_eq!(next_packet(&mut ws).await, valid);
    assert_eq!(relay.state(), RelayState::Open);
    let stats = relay.stats();
    assert_eq!(stats.udp_to_ws.messages_dropped, 2);
    assert_eq!(stats.udp_to_ws.messages_forwarded, 1);

    relay.close().await;
}

#[tokio::test]
async fn test_invalid_ws_frames_are_dropped() {
    let ctrl = controller().await;
    let remote_port = ctrl.local_addr().unwrap().port();
    let (relay, addrs) = open_relay(loopback_config(remote_port)).await;
    let mut ws = connect(&relay, &addrs).await;

    ws.send(Message::Text("/not/binary".into())).await.unwrap();
    ws.send(Message::Binary(vec![0xde, 0xad])).await.unwrap();
    let valid = packet("/ok", vec![OscArg::Bool(true)]);
    ws.send(Message::Binary(encode(&valid).unwrap())).await.unwrap();

    assert_eq!(recv_datagram(&ctrl).await, valid);
    assert_eq!(relay.stats().ws_to_udp.messages_dropped, 2);

    relay.close().await;
}

#[tokio::test]
async fn test_send_rejected_before_open() {
    let ctrl = controller().await;
    let remote_port = ctrl.local_addr().unwrap().port();
    let relay = Relay::new(loopback_config(remote_port)).unwrap();

    assert_eq!(relay.state(), RelayState::Idle);
    assert!(relay.bound_addrs().is_none());
    assert!(matches!(
        relay.send(&packet("/early", vec![])),
        Err(RelayError::NotOpen)
    ));
}

#[tokio::test]
async fn test_datagrams_without_clients_are_dropped() {
    let ctrl = controller().await;
    let remote_port = ctrl.local_addr().unwrap().port();
    let (relay, addrs) = open_relay(loopback_config(remote_port)).await;

    for i in 0..2 {
        let early = packet("/early", vec![OscArg::Int(i)]);
        ctrl.send_to(&encode(&early).unwrap(), addrs.udp).await.unwrap();
    }
    timeout(WAIT, async {
        while relay.stats().udp_to_ws.messages_dropped < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("early datagrams dropped");
    assert_eq!(relay.stats().udp_to_ws.messages_forwarded, 0);

    let mut ws = connect(&relay, &addrs).await;
    let later: Vec<_> = (0..3)
        .map(|i| packet("/later", vec![OscArg::Int(i)]))
        .collect();
    for p in &later {
        ctrl.send_to(&encode(p).unwrap(), addrs.udp).await.unwrap();
    }
    for p in &later {
        assert_eq!(&next_packet(&mut ws).await, p);
    }

    let stats = relay.stats();
    assert_eq!(stats.udp_to_ws.messages_dropped, 2);
    assert_eq!(stats.udp_to_ws.messages_forwarded, 3);

    relay.close().await;
}

#[tokio::test]
async fn test_send_injects_to_all_clients() {
    let ctrl = controller().await;
    let remote_port = ctrl.local_addr().unwrap().port();
    let (relay, addrs) = open_relay(loopback_config(remote_port)).await;

    assert!(!relay.send(&packet("/nobody", vec![])).unwrap());

    let mut first = connect(&relay, &addrs).await;
    let mut second = connect(&relay, &addrs).await;
    let injected = packet("/status", vec![OscArg::String("ready".into())]);
    assert!(relay.send(&injected).unwrap());

    assert_eq!(next_packet(&mut first).await, injected);
    assert_eq!(next_packet(&mut second).await, injected);

    relay.close().await;
    assert!(matches!(
        relay.send(&injected),
        Err(RelayError::NotOpen)
    ));
}

#[tokio::test]
async fn test_heartbeat_counter_increments() {
    let ctrl = controller().await;
    let mut config = loopback_config(ctrl.local_addr().unwrap().port());
    config.heartbeat = HeartbeatConfig::every(30);
    let (relay, addrs) = open_relay(config).await;
    let mut ws = connect(&relay, &addrs).await;

    let mut previous: Option<(i64, i64)> = None;
    for _ in 0..3 {
        let OscPacket::Message(msg) = next_packet(&mut ws).await else {
            panic!("expected a message");
        };
        assert_eq!(msg.address(), "/ping");
        let (count, ts) = match msg.args() {
            [OscArg::Long(count), OscArg::Long(ts)] => (*count, *ts),
            other => panic!("unexpected ping args: {:?}", other),
        };
        assert!(count >= 1);
        if let Some((prev_count, prev_ts)) = previous {
            assert_eq!(count, prev_count + 1);
            assert!(ts >= prev_ts);
        }
        previous = Some((count, ts));
    }
    assert!(relay.stats().heartbeats_sent >= 3);

    relay.close().await;
}

#[tokio::test]
async fn test_heartbeat_restarts_from_one_on_reopen() {
    let ctrl = controller().await;
    let mut config = loopback_config(ctrl.local_addr().unwrap().port());
    config.heartbeat = HeartbeatConfig::every(200);
    let relay = Relay::new(config).unwrap();

    for _ in 0..2 {
        let addrs = relay.open().await.unwrap();
        let mut ws = connect(&relay, &addrs).await;
        let OscPacket::Message(msg) = next_packet(&mut ws).await else {
            panic!("expected a message");
        };
        assert_eq!(msg.args()[0], OscArg::Long(1));
        relay.close().await;
        wait_for_clients(&relay, 0).await;
    }
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (relay, _addrs) = open_relay(loopback_config(9)).await;
    let mut events = relay.subscribe();

    relay.close().await;
    relay.close().await;
    assert_eq!(relay.state(), RelayState::Closed);

    assert!(matches!(events.recv().await, Ok(RelayEvent::Closed)));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_close_disconnects_clients() {
    let (relay, addrs) = open_relay(loopback_config(9)).await;
    let mut ws = connect(&relay, &addrs).await;

    relay.close().await;

    let ended = timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok());
    wait_for_clients(&relay, 0).await;
}

#[tokio::test]
async fn test_ws_bind_failure_tears_down_udp() {
    let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_port = blocker.local_addr().unwrap().port();

    let udp_port = {
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    let mut config = loopback_config(9);
    config.udp_server = EndpointConfig::new("127.0.0.1", udp_port).exclusive(true);
    config.ws_server.port = ws_port;

    let relay = Relay::new(config).unwrap();
    let mut events = relay.subscribe();

    let err = relay.open().await.unwrap_err();
    assert!(matches!(
        err,
        RelayError::TransportOpen {
            transport: Transport::WebSocket,
            ..
        }
    ));
    assert_eq!(relay.state(), RelayState::Failed);
    assert!(relay.bound_addrs().is_none());

    match events.recv().await {
        Ok(RelayEvent::Error(e)) => assert!(matches!(*e, RelayError::TransportOpen { .. })),
        other => panic!("expected error event, got {:?}", other),
    }
    assert!(events.try_recv().is_err());

    // The UDP side must have been released.
    UdpSocket::bind(("127.0.0.1", udp_port))
        .await
        .expect("udp port released");

    // Failed stays Failed through close().
    relay.close().await;
    assert_eq!(relay.state(), RelayState::Failed);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_exclusive_udp_conflict_fails_open() {
    let holder = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let mut config = loopback_config(9);
    config.udp_server = EndpointConfig::new("127.0.0.1", port).exclusive(true);
    let relay = Relay::new(config).unwrap();

    let err = relay.open().await.unwrap_err();
    assert!(matches!(
        err,
        RelayError::TransportOpen {
            transport: Transport::Udp,
            ..
        }
    ));
    assert_eq!(relay.state(), RelayState::Failed);

    // A failed relay may be opened again once the port is free.
    drop(holder);
    relay.open().await.expect("reopen");
    assert_eq!(relay.state(), RelayState::Open);
    relay.close().await;
}

#[tokio::test]
async fn test_max_clients_rejects_with_503() {
    let mut config = loopback_config(9);
    config.ws_server.max_clients = 1;
    let (relay, addrs) = open_relay(config).await;
    let _first = connect(&relay, &addrs).await;

    match connect_async(format!("ws://{}/", addrs.ws)).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 503),
        other => panic!("expected HTTP 503, got {:?}", other.map(|_| ())),
    }
    assert_eq!(relay.client_count(), 1);

    relay.close().await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let (relay, addrs) = open_relay(loopback_config(9)).await;

    let mut stream = TcpStream::connect(addrs.ws).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .expect("response in time")
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"status\":\"open\""));
    assert!(response.contains("\"clients\":0"));

    relay.close().await;
}
