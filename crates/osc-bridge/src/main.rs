// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC Bridge CLI
//!
//! Relays OSC between a UDP controller and WebSocket clients.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (UDP 8000 in, 9000 out, WebSocket 8080)
//! osc-bridge
//!
//! # Listen on all interfaces, controller on the LAN
//! osc-bridge --udp-host 0.0.0.0 --ws-host 0.0.0.0 --remote-host 192.168.1.20
//!
//! # Heartbeat every 2s
//! osc-bridge --auto-ping --ping-interval 2000
//!
//! # Using configuration file
//! osc-bridge --config osc-bridge.toml
//! ```

use clap::{Parser, Subcommand};
use osc_bridge::{
    local_ipv4_addresses, BoundAddrs, BridgeConfig, ConfigError, EndpointConfig,
    HeartbeatConfig, Relay, RelayEvent, RelayState, RelayStatsSnapshot, RemoteConfig,
    WsServerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

/// OSC UDP <-> WebSocket bridge
#[derive(Parser, Debug)]
#[command(name = "osc-bridge")]
#[command(about = "OSC Bridge - Relay OSC between a UDP controller and WebSocket clients")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP listen host
    #[arg(long)]
    udp_host: Option<String>,

    /// UDP listen port
    #[arg(long)]
    udp_port: Option<u16>,

    /// Do not share the UDP listen port with other sockets
    #[arg(long)]
    exclusive: bool,

    /// UDP peer host (where WebSocket traffic is sent)
    #[arg(long)]
    remote_host: Option<String>,

    /// UDP peer port
    #[arg(long)]
    remote_port: Option<u16>,

    /// WebSocket listen host
    #[arg(long)]
    ws_host: Option<String>,

    /// WebSocket listen port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Send a /ping heartbeat to WebSocket clients
    #[arg(long)]
    auto_ping: bool,

    /// Heartbeat period in milliseconds
    #[arg(long)]
    ping_interval: Option<u64>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "osc-bridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Handle subcommands
    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    let stats_interval = config.stats_interval_secs;

    let relay = Arc::new(Relay::new(config)?);

    println!("OSC Bridge v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();

    let events = tokio::spawn(log_events(Arc::clone(&relay), relay.subscribe()));

    if let Err(e) = relay.open().await {
        eprintln!("Failed to start bridge: {}", e);
        events.abort();
        std::process::exit(1);
    }

    if stats_interval > 0 {
        let stats_relay = Arc::clone(&relay);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                if stats_relay.state() != RelayState::Open {
                    break;
                }
                print_stats(&stats_relay.stats(), stats_relay.client_count());
            }
        });
    }

    println!("Press Ctrl+C to stop...");
    println!();

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            println!("\nShutting down...");
        }
        state = relay.stopped() => {
            eprintln!("\nBridge {} ({})", state, state.describe());
        }
    }

    relay.close().await;
    let final_state = relay.state();

    println!("\nFinal Statistics:");
    print_stats(&relay.stats(), relay.client_count());

    // Let the logger report the close before exiting.
    let _ = tokio::time::timeout(Duration::from_secs(1), events).await;

    if final_state == RelayState::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn build_config(args: &Args) -> Result<BridgeConfig, ConfigError> {
    let mut config = match args.config {
        Some(ref path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };

    if let Some(ref host) = args.udp_host {
        config.udp_server.host = host.clone();
    }
    if let Some(port) = args.udp_port {
        config.udp_server.port = port;
    }
    if args.exclusive {
        config.udp_server.exclusive = true;
    }
    if let Some(ref host) = args.remote_host {
        config.udp_client.host = host.clone();
    }
    if let Some(port) = args.remote_port {
        config.udp_client.port = port;
    }
    if let Some(ref host) = args.ws_host {
        config.ws_server.host = host.clone();
    }
    if let Some(port) = args.ws_port {
        config.ws_server.port = port;
    }
    if args.auto_ping {
        config.heartbeat.enabled = true;
    }
    if let Some(ms) = args.ping_interval {
        config.heartbeat.interval_ms = ms;
    }
    if let Some(secs) = args.stats_interval {
        config.stats_interval_secs = secs;
    }
    config.log_level = args.log_level.clone();

    config.validate()?;
    Ok(config)
}

/// Report relay events until the relay closes; returns how many were seen.
///
/// Takes a receiver subscribed before `open` so the `Opened` summary is
/// never missed.
async fn log_events(relay: Arc<Relay>, mut events: broadcast::Receiver<RelayEvent>) -> usize {
    let mut seen = 0;
    loop {
        match events.recv().await {
            Ok(RelayEvent::Opened(addrs)) => show_config(relay.config(), &addrs),
            Ok(RelayEvent::Closed) => {
                tracing::info!("Bridge closed");
                return seen + 1;
            }
            Ok(RelayEvent::Error(e)) => tracing::error!("Bridge error: {}", e),
            Err(RecvError::Lagged(n)) => tracing::warn!("Missed {} bridge events", n),
            Err(RecvError::Closed) => return seen,
        }
        seen += 1;
    }
}

fn show_config(config: &BridgeConfig, addrs: &BoundAddrs) {
    println!("Bridge: {}", config.name);
    println!(
        "  UDP in:     {} (bound {}{})",
        config.udp_server.display_addr(),
        addrs.udp,
        if config.udp_server.exclusive {
            ", exclusive"
        } else {
            ""
        }
    );
    println!(
        "  UDP out:    {} ({})",
        config.udp_client.display_addr(),
        addrs.remote
    );
    println!("  WebSocket:  ws://{}", addrs.ws);
    if config.heartbeat.enabled {
        println!("  Heartbeat:  /ping every {} ms", config.heartbeat.interval_ms);
    }

    let ips = local_ipv4_addresses();
    if !ips.is_empty() {
        println!();
        println!("Local IPv4 addresses:");
        for (iface, ip) in ips {
            println!("  {:<12} {}", iface, ip);
        }
    }
    println!();
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = BridgeConfig {
        name: "example-bridge".into(),
        udp_server: EndpointConfig::new("0.0.0.0", 8000),
        udp_client: RemoteConfig::new("192.168.1.20", 9000),
        ws_server: WsServerConfig::new("0.0.0.0", 8080),
        heartbeat: HeartbeatConfig::every(5000),
        stats_interval_secs: 10,
        ..Default::default()
    };

    let toml_str = config.to_toml()?;

    // Add comments
    let content = format!(
        r#"# OSC Bridge Configuration
# Generated by osc-bridge gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match BridgeConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Bridge:    {}", config.name);
            println!(
                "UDP in:    {}{}",
                config.udp_server.display_addr(),
                if config.udp_server.exclusive {
                    " (exclusive)"
                } else {
                    ""
                }
            );
            println!("UDP out:   {}", config.udp_client.display_addr());
            println!(
                "WebSocket: {} (max {} clients)",
                config.ws_server.display_addr(),
                config.ws_server.max_clients
            );
            if config.heartbeat.enabled {
                println!("Heartbeat: every {} ms", config.heartbeat.interval_ms);
            } else {
                println!("Heartbeat: disabled");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &RelayStatsSnapshot, clients: usize) {
    println!("--- Bridge Statistics ({} clients) ---", clients);
    for stat in [&stats.udp_to_ws, &stats.ws_to_udp] {
        println!(
            "  {}: {} msgs ({:.1} msg/s), {}, {} dropped, {} errors",
            stat.direction,
            stat.messages_forwarded,
            stat.messages_per_second(),
            format_bytes(stat.bytes_forwarded),
            stat.messages_dropped,
            stat.errors
        );
    }
    if stats.heartbeats_sent > 0 {
        println!("  Heartbeats sent: {}", stats.heartbeats_sent);
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> BridgeConfig {
        BridgeConfig {
            udp_server: EndpointConfig::new("127.0.0.1", 0),
            udp_client: RemoteConfig::new("127.0.0.1", 9),
            ws_server: WsServerConfig::new("127.0.0.1", 0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_event_log_sees_open_and_close() {
        let relay = Arc::new(Relay::new(loopback_config()).unwrap());
        let events = tokio::spawn(log_events(Arc::clone(&relay), relay.subscribe()));

        relay.open().await.expect("open");
        relay.close().await;

        let seen = tokio::time::timeout(Duration::from_secs(5), events)
            .await
            .expect("logger finished")
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
