// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! osc-tail - Show the most recent OSC messages from an osc-bridge
//!
//! Keeps the last N messages and the running total, redrawing the
//! window newest-first as messages arrive (or printing each one with
//! `--follow`).

use chrono::Local;
use clap::Parser;
use colored::*;
use futures::StreamExt;
use osc_stream::{
    normalize_take, pipe_to, OscConsumer, OscReadable, OscStream, RetentionBuffer, StreamError,
    StreamOptions,
};
use osc_wire::OscPacket;
use std::io::{self, IsTerminal, Write};
use tracing_subscriber::EnvFilter;

/// Show the most recent OSC messages relayed by an osc-bridge
#[derive(Parser, Debug)]
#[command(name = "osc-tail")]
#[command(version)]
#[command(about = "Show the most recent OSC messages relayed by an osc-bridge")]
struct Args {
    /// Bridge WebSocket host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Bridge WebSocket port
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Number of messages to keep and display
    #[arg(short, long, default_value = "50")]
    take: f64,

    /// Print every message as it arrives instead of redrawing the window
    #[arg(short, long)]
    follow: bool,

    /// Stop after this many messages (0 = unlimited)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

struct Line {
    received_at: String,
    text: String,
}

/// Retained window plus how to show it.
struct Tail {
    window: RetentionBuffer<Line>,
    follow: bool,
    clear_screen: bool,
}

impl Tail {
    fn new(take: usize, follow: bool) -> Self {
        Self {
            window: RetentionBuffer::new(take),
            follow,
            clear_screen: !follow && io::stdout().is_terminal(),
        }
    }

    fn print_latest(&self) {
        if let Some((seq, line)) = self.window.numbered().next() {
            print_line(seq, line);
        }
    }

    fn render(&self) {
        let mut out = io::stdout().lock();
        if self.clear_screen {
            let _ = write!(out, "\x1b[2J\x1b[H");
        }
        let _ = writeln!(
            out,
            "{} {} message(s) received",
            ">>>".green().bold(),
            self.window.received()
        );
        drop(out);

        for (seq, line) in self.window.numbered() {
            print_line(seq, line);
        }
        if self.window.hidden() > 0 {
            println!(
                "{}",
                format!("(Displaying last {} messages)", self.window.take()).dimmed()
            );
        }
        let _ = io::stdout().flush();
    }
}

impl OscConsumer for Tail {
    fn on_message(&mut self, packet: OscPacket) {
        self.window.push(Line {
            received_at: Local::now().format("%H:%M:%S%.3f").to_string(),
            text: packet.to_string(),
        });
        if self.follow {
            self.print_latest();
        } else {
            self.render();
        }
    }

    fn on_error(&mut self, err: &StreamError) {
        eprintln!("{}: {}", "Stream error".red().bold(), err);
    }
}

fn print_line(seq: u64, line: &Line) {
    println!(
        "{} {} {}",
        format!("[{}]", line.received_at).dimmed(),
        format!("{}:", seq).yellow(),
        line.text
    );
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if args.no_color || !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(&args).await {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(args: &Args) -> Result<(), StreamError> {
    let take = normalize_take(args.take);
    let options = StreamOptions::new(args.host.clone(), args.port);

    eprintln!(
        "{} {} {} (keeping last {})",
        ">>>".green().bold(),
        "Connecting to".bold(),
        options.url().cyan(),
        take
    );

    let (mut readable, _writable) = OscStream::connect(options).into_split();
    readable.opened().await?;
    eprintln!("{}", "Connected. Press Ctrl+C to stop".dimmed());

    let mut tail = Tail::new(take, args.follow);
    let outcome = tokio::select! {
        res = consume(&mut readable, &mut tail, args.count) => res.map(|_| "Bridge closed the connection"),
        _ = tokio::signal::ctrl_c() => {
            readable.cancel();
            Ok("Interrupted")
        }
    };

    eprintln!(
        "\n{} {}, received {} message(s)",
        "---".dimmed(),
        outcome.as_ref().map(|s| *s).unwrap_or("Stream failed"),
        tail.window.received()
    );
    outcome.map(|_| ())
}

async fn consume(readable: &mut OscReadable, tail: &mut Tail, count: u64) -> Result<u64, StreamError> {
    if count > 0 {
        let mut limited = readable.take(count as usize);
        pipe_to(&mut limited, tail).await
    } else {
        pipe_to(readable, tail).await
    }
}
