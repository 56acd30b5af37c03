// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operator control channel.
//!
//! Commands travel over a channel and wake the poll through a
//! [`mio::Waker`], so the event loop sees the control channel as one more
//! readiness source.

use crate::metrics::RelayMetrics;
use mio::Waker;
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// Operator keyword that stops the relay.
pub const SHUTDOWN_KEYWORD: &str = "exit";

/// Commands accepted by the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Close every connection and stop the loop.
    Shutdown,

    /// Line that is not a known command (logged and ignored).
    Unrecognized(String),
}

impl ControlCommand {
    /// Interpret one operator line. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line == SHUTDOWN_KEYWORD {
            Self::Shutdown
        } else {
            Self::Unrecognized(line.to_string())
        }
    }
}

/// Handle for controlling a running relay from other threads.
#[derive(Clone)]
pub struct RelayHandle {
    tx: Sender<ControlCommand>,
    waker: Arc<Waker>,
    metrics: Arc<RelayMetrics>,
    local_addr: SocketAddr,
}

impl RelayHandle {
    pub(crate) fn new(
        tx: Sender<ControlCommand>,
        waker: Arc<Waker>,
        metrics: Arc<RelayMetrics>,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            tx,
            waker,
            metrics,
            local_addr,
        }
    }

    /// Send a command to the event loop.
    pub fn send(&self, cmd: ControlCommand) -> io::Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "relay stopped"))?;
        self.waker.wake()
    }

    /// Forward one operator line.
    pub fn submit_line(&self, line: &str) -> io::Result<()> {
        self.send(ControlCommand::parse(line))
    }

    /// Ask the relay to shut down.
    pub fn shutdown(&self) -> io::Result<()> {
        self.send(ControlCommand::Shutdown)
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Address shared by the ingest socket and the listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
