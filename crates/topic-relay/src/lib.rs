// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic Relay
//!
//! Receives fixed-layout measurement datagrams over UDP, decodes them into
//! text lines and forwards each line to every TCP consumer subscribed to the
//! measurement's topic.
//!
//! - UDP ingest and TCP consumers share one port
//! - Consumers identify themselves with a unique id, then send
//!   `subscribe <topic>` / `unsubscribe <topic>` commands
//! - Every TCP message in either direction is a fixed 1600-byte frame
//!
//! # Example
//!
//! ```no_run
//! use topic_relay::{Relay, RelayConfig};
//!
//! let relay = Relay::bind(RelayConfig::with_port(12345))?;
//! let handle = relay.handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     let _ = handle.shutdown();
//! });
//! let stats = relay.run()?;
//! println!("delivered {} messages", stats.messages_delivered);
//! # Ok::<(), topic_relay::RelayError>(())
//! ```

pub mod config;
pub mod frame;
pub mod measurement;
pub mod metrics;
pub mod relay;

pub use config::{ConfigError, RelayConfig};
pub use frame::{FrameError, FRAME_SIZE};
pub use measurement::{DecodeError, DecodedValue, Measurement, ValueKind};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use relay::{ControlCommand, Relay, RelayError, RelayHandle};
