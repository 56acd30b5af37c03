// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic Relay
//!
//! Forwards UDP measurements to subscribed TCP consumers.
//!
//! # Usage
//!
//! ```bash
//! # Serve UDP and TCP on port 12345
//! topic-relay 12345
//!
//! # Config file, verbose logging
//! topic-relay --config relay.json --log-level debug
//! ```
//!
//! Type `exit` on stdin to stop the relay.

use clap::Parser;
use std::io::BufRead;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use topic_relay::{ConfigError, Relay, RelayConfig, RelayHandle};

/// Topic Relay - UDP measurements to TCP topic subscribers
#[derive(Parser, Debug)]
#[command(name = "topic-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port shared by UDP ingest and TCP consumers (1024-65535)
    #[arg(
        value_parser = clap::value_parser!(u16).range(1024..),
        required_unless_present = "config"
    )]
    port: Option<u16>,

    /// Bind address [default: 0.0.0.0, or the config file's]
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = resolve_config(&args)?;
    let relay = Relay::bind(config.clone())?;

    info!("+----------------------------------------------------+");
    info!(
        "|       Topic Relay v{:<32}|",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Bind:     {:40}|", relay.local_addr());
    info!("|  Backlog:  {:40}|", config.listen_backlog);
    info!("|  Queue:    {:40}|", format!("{} frames", config.max_pending_frames));
    info!("+----------------------------------------------------+");
    info!("Type 'exit' to stop");

    spawn_stdin_forwarder(relay.handle())?;

    let stats = relay.run()?;

    info!(
        "Relay stopped: {} datagrams ({} dropped), {} messages delivered, {} clients served",
        stats.datagrams_received,
        stats.datagrams_dropped,
        stats.messages_delivered,
        stats.consumers_accepted
    );
    Ok(())
}

/// Config file (or defaults) with explicit arguments applied on top.
fn resolve_config(args: &Args) -> Result<RelayConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            RelayConfig::from_file(path)?
        }
        None => RelayConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    Ok(config)
}

/// Forward operator lines from stdin to the relay.
fn spawn_stdin_forwarder(handle: RelayHandle) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("relay-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("stdin read failed: {}", e);
                        break;
                    }
                };
                if handle.submit_line(&line).is_err() {
                    // Relay already stopped.
                    return;
                }
            }
            debug!("stdin closed");
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_and_bind_from_args() {
        let args = Args::parse_from(["topic-relay", "4000", "--bind", "127.0.0.1"]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.socket_addr(), "127.0.0.1:4000".parse().unwrap());
    }

    #[test]
    fn test_port_below_range_rejected() {
        assert!(Args::try_parse_from(["topic-relay", "80"]).is_err());
        assert!(Args::try_parse_from(["topic-relay"]).is_err());
    }

    #[test]
    fn test_explicit_args_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"port": 5000, "bind_address": "10.1.2.3", "max_pending_frames": 8}"#)
            .unwrap();
        let path = path.to_str().unwrap();

        let args = Args::parse_from(["topic-relay", "--config", path]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.socket_addr(), "10.1.2.3:5000".parse().unwrap());

        let args = Args::parse_from(["topic-relay", "6000", "--config", path, "--bind", "127.0.0.1"]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.socket_addr(), "127.0.0.1:6000".parse().unwrap());
        assert_eq!(config.max_pending_frames, 8);
    }
}
