// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay event loop.
//!
//! A single mio poll multiplexes every input source; all state is owned by
//! the thread calling [`Relay::run`].
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                           Relay                              |
//! |  +-------------------------------------------------------+  |
//! |  |                    mio::Poll                           |  |
//! |  |  - Waker        (operator control channel)            |  |
//! |  |  - UDP socket   (measurement ingest)                  |  |
//! |  |  - TCP listener (new consumers)                       |  |
//! |  |  - TCP streams  (handshake, subscribe, delivery)      |  |
//! |  +-------------------------------------------------------+  |
//! |            |                  |                  |           |
//! |            v                  v                  v           |
//! |  +---------------+   +----------------+   +--------------+  |
//! |  |    Decode     |-->|    Dispatch    |-->|   Consumer   |  |
//! |  |  measurement  |   | (registry scan)|   |  send queues |  |
//! |  +---------------+   +----------------+   +--------------+  |
//! +-------------------------------------------------------------+
//! ```
//!
//! Consumer connections move through `Connecting -> Active -> Closed`:
//! an accepted stream waits in `connecting` until its first frame (the
//! consumer id) arrives, then either enters the registry or is closed as a
//! duplicate.

use crate::config::{ConfigError, RelayConfig};
use crate::frame::frame_text;
use crate::measurement::{Measurement, MAX_DATAGRAM_LEN};
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use mio::net::{TcpListener, UdpSocket};
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod command;
pub mod connection;
pub mod control;
pub mod dispatch;
pub mod registry;

use command::SubscriptionCommand;
pub use connection::{ConsumerConnection, FrameSink, ReadOutcome};
pub use control::{ControlCommand, RelayHandle};
pub use dispatch::{dispatch, DispatchReport, FailedDelivery};
pub use registry::{ClientRegistry, ConnectionId, Consumer, Handshake};

// ============================================================================
// Constants
// ============================================================================

/// Token for the control-channel waker
const WAKER_TOKEN: Token = Token(0);

/// Token for the UDP ingest socket
const INGEST_TOKEN: Token = Token(1);

/// Token for the TCP listener
const LISTENER_TOKEN: Token = Token(2);

/// Starting token for consumer connections
const CONNECTION_TOKEN_START: usize = 3;

/// Relay error types.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The relay: sockets, registry and event loop.
pub struct Relay {
    config: RelayConfig,
    poll: Poll,
    listener: TcpListener,
    ingest: UdpSocket,
    local_addr: SocketAddr,

    /// Accepted streams still waiting for their handshake frame
    connecting: HashMap<ConnectionId, ConsumerConnection>,

    /// Active consumers
    registry: ClientRegistry<ConsumerConnection>,

    /// Connections that hit the per-read frame cap and still need reading
    backlogged: Vec<ConnectionId>,

    next_token: usize,
    control_rx: Receiver<ControlCommand>,
    handle: RelayHandle,
    metrics: Arc<RelayMetrics>,

    /// One byte larger than a valid datagram so oversized ones are detected
    datagram_buf: Vec<u8>,
}

impl Relay {
    /// Validate `config` and bind the ingest socket and the listener.
    ///
    /// Failures here are fatal startup errors.
    pub fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let addr = config.socket_addr();
        let poll = Poll::new()?;

        let std_listener = bind_listener(addr, config.listen_backlog)
            .map_err(|source| RelayError::Bind { addr, source })?;
        let mut listener = TcpListener::from_std(std_listener);
        let local_addr = listener.local_addr()?;

        let std_ingest =
            bind_ingest(local_addr).map_err(|source| RelayError::Bind { addr, source })?;
        let mut ingest = UdpSocket::from_std(std_ingest);

        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        poll.registry()
            .register(&mut ingest, INGEST_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (control_tx, control_rx) = channel();
        let metrics = Arc::new(RelayMetrics::new());
        let handle = RelayHandle::new(control_tx, waker, metrics.clone(), local_addr);

        Ok(Self {
            config,
            poll,
            listener,
            ingest,
            local_addr,
            connecting: HashMap::new(),
            registry: ClientRegistry::new(),
            backlogged: Vec::new(),
            next_token: CONNECTION_TOKEN_START,
            control_rx,
            handle,
            metrics,
            datagram_buf: vec![0u8; MAX_DATAGRAM_LEN + 1],
        })
    }

    /// Handle for sending control commands from other threads.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Address shared by the ingest socket and the listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the event loop until a shutdown command arrives.
    ///
    /// Returns the final metrics.
    pub fn run(mut self) -> Result<MetricsSnapshot, RelayError> {
        info!("Relay listening on {} (udp + tcp)", self.local_addr);

        let mut events = Events::with_capacity(self.config.max_events);

        loop {
            // Backlogged connections get no new edge, so only peek at the poll.
            let timeout = if self.backlogged.is_empty() {
                None
            } else {
                Some(Duration::ZERO)
            };
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.close_all();
                return Err(e.into());
            }

            let mut stop = false;
            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {
                        stop |= self.handle_control();
                    }
                    INGEST_TOKEN => {
                        self.handle_ingest();
                    }
                    LISTENER_TOKEN => {
                        self.handle_accept();
                    }
                    token => {
                        let handle = ConnectionId(token.0);
                        if event.is_readable() || event.is_read_closed() {
                            self.handle_readable(handle);
                        }
                        if event.is_writable() {
                            self.handle_writable(handle);
                        }
                    }
                }
            }

            for handle in std::mem::take(&mut self.backlogged) {
                self.handle_readable(handle);
            }

            if stop {
                info!("Shutdown requested, closing {} clients", self.registry.len());
                self.close_all();
                return Ok(self.metrics.snapshot());
            }
        }
    }

    /// Drain the control channel. Returns `true` on shutdown.
    fn handle_control(&mut self) -> bool {
        loop {
            match self.control_rx.try_recv() {
                Ok(ControlCommand::Shutdown) => return true,
                Ok(ControlCommand::Unrecognized(line)) => {
                    debug!("Ignoring operator command {:?}", line);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Read, decode and dispatch every pending datagram.
    fn handle_ingest(&mut self) {
        loop {
            match self.ingest.recv_from(&mut self.datagram_buf) {
                Ok((len, source)) => {
                    self.metrics.record_datagram();
                    match Measurement::decode(source, &self.datagram_buf[..len]) {
                        Ok(measurement) => self.publish(&measurement),
                        Err(e) => {
                            self.metrics.record_dropped();
                            debug!("Dropping datagram from {}: {}", source, e);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Ingest receive error: {}", e);
                    break;
                }
            }
        }
    }

    fn publish(&mut self, measurement: &Measurement) {
        match dispatch(&mut self.registry, measurement) {
            Ok(report) => {
                self.metrics.record_delivered(report.delivered);
                for failed in report.failed {
                    self.metrics.record_delivery_failure();
                    warn!(
                        "Delivery to client {} failed: {}",
                        failed.consumer.id(),
                        failed.error
                    );
                    self.release(failed.consumer);
                }
            }
            Err(e) => {
                self.metrics.record_dropped();
                warn!(
                    "Dropping measurement on {} from {}: {}",
                    measurement.topic(),
                    measurement.source(),
                    e
                );
            }
        }
    }

    /// Accept every pending connection.
    fn handle_accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    let handle = ConnectionId(self.next_token);
                    self.next_token += 1;

                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        Token(handle.0),
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        warn!("Failed to register connection from {}: {}", peer_addr, e);
                        continue;
                    }

                    if self.config.tcp_nodelay {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("set_nodelay failed for {}: {}", peer_addr, e);
                        }
                    }

                    debug!("Connection {} from {} awaiting handshake", handle, peer_addr);
                    self.connecting.insert(
                        handle,
                        ConsumerConnection::new(stream, peer_addr, self.config.max_pending_frames),
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, handle: ConnectionId) {
        if self.connecting.contains_key(&handle) {
            self.read_handshake(handle);
        } else {
            self.read_commands(handle);
        }
    }

    /// First frame on a new connection is the consumer id.
    fn read_handshake(&mut self, handle: ConnectionId) {
        let outcome = match self.connecting.get_mut(&handle) {
            Some(conn) => conn.read_frames(),
            None => return,
        };
        let ReadOutcome {
            frames,
            closed,
            more,
        } = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Read error on connection {} before handshake: {}", handle, e);
                self.drop_connecting(handle);
                return;
            }
        };

        let mut frames = frames.into_iter();
        let Some(first) = frames.next() else {
            if closed {
                debug!("Connection {} closed before handshake", handle);
                self.drop_connecting(handle);
            }
            return;
        };
        let Some(conn) = self.connecting.remove(&handle) else {
            return;
        };

        let id = registry::normalize_id(&frame_text(&first));
        let peer_addr = conn.peer_addr();

        match self.registry.handshake(handle, conn, &id) {
            Handshake::Accepted => {
                self.metrics.record_accepted();
                info!("New client {} connected from {}.", id, peer_addr);
            }
            Handshake::RejectedDuplicate(mut conn) => {
                self.metrics.record_rejected();
                info!("Client {} already connected.", id);
                self.deregister(&mut conn);
                return;
            }
            Handshake::RejectedInvalid(mut conn) => {
                self.metrics.record_rejected();
                warn!(
                    "Connection from {} sent an invalid client id {:?} (1-{} bytes)",
                    peer_addr,
                    id,
                    registry::MAX_ID_LEN
                );
                self.deregister(&mut conn);
                return;
            }
        }

        self.apply_commands(handle, frames);
        self.after_read(handle, closed, more);
    }

    fn read_commands(&mut self, handle: ConnectionId) {
        let outcome = match self.registry.get_mut(handle) {
            Some(consumer) => consumer.connection_mut().read_frames(),
            None => return,
        };

        match outcome {
            Ok(ReadOutcome {
                frames,
                closed,
                more,
            }) => {
                self.apply_commands(handle, frames);
                self.after_read(handle, closed, more);
            }
            Err(e) => {
                warn!("Read error on connection {}: {}", handle, e);
                self.disconnect(handle);
            }
        }
    }

    fn after_read(&mut self, handle: ConnectionId, closed: bool, more: bool) {
        if closed {
            self.disconnect(handle);
        } else if more && !self.backlogged.contains(&handle) {
            self.backlogged.push(handle);
        }
    }

    fn apply_commands(&mut self, handle: ConnectionId, frames: impl IntoIterator<Item = Vec<u8>>) {
        for frame in frames {
            let line = frame_text(&frame);
            let Some(cmd) = SubscriptionCommand::parse(&line) else {
                debug!("Ignoring command {:?} on connection {}", line.trim(), handle);
                continue;
            };

            let action = match &cmd {
                SubscriptionCommand::Subscribe(topic) => {
                    self.registry.subscribe(handle, topic);
                    "subscribed to"
                }
                SubscriptionCommand::Unsubscribe(topic) => {
                    self.registry.unsubscribe(handle, topic);
                    "unsubscribed from"
                }
            };
            self.metrics.record_command();
            debug!("Connection {} {} {}", handle, action, cmd.topic());
        }
    }

    /// Flush queued frames once the socket accepts more data.
    fn handle_writable(&mut self, handle: ConnectionId) {
        let result = match self.registry.get_mut(handle) {
            Some(consumer) => consumer.connection_mut().flush(),
            None => return,
        };

        if let Err(e) = result {
            self.metrics.record_delivery_failure();
            warn!("Write error on connection {}: {}", handle, e);
            self.disconnect(handle);
        }
    }

    fn disconnect(&mut self, handle: ConnectionId) {
        if let Some(consumer) = self.registry.disconnect(handle) {
            self.release(consumer);
        }
    }

    /// Close a consumer's connection; its topics go with the record.
    fn release(&mut self, consumer: Consumer<ConsumerConnection>) {
        info!("Client {} disconnected.", consumer.id());
        debug!(
            "Released {} subscriptions of client {}",
            consumer.topic_count(),
            consumer.id()
        );
        self.metrics.record_disconnected();
        let mut conn = consumer.into_connection();
        self.deregister(&mut conn);
    }

    fn drop_connecting(&mut self, handle: ConnectionId) {
        if let Some(mut conn) = self.connecting.remove(&handle) {
            self.deregister(&mut conn);
        }
    }

    fn deregister(&self, conn: &mut ConsumerConnection) {
        if let Err(e) = self.poll.registry().deregister(conn.get_mut()) {
            debug!("Deregister failed for {}: {}", conn.peer_addr(), e);
        }
    }

    /// Close every open connection (shutdown path).
    fn close_all(&mut self) {
        let connecting: Vec<_> = self.connecting.drain().collect();
        for (_, mut conn) in connecting {
            self.deregister(&mut conn);
        }

        let consumers: Vec<_> = self.registry.drain().collect();
        for (_, consumer) in consumers {
            let mut conn = consumer.into_connection();
            if let Err(e) = conn.flush() {
                debug!("Final flush to {} failed: {}", conn.peer_addr(), e);
            }
            self.deregister(&mut conn);
            if let Err(e) = conn.get_mut().shutdown(Shutdown::Both) {
                debug!("Shutdown of {} failed: {}", conn.peer_addr(), e);
            }
            self.metrics.record_disconnected();
        }
    }
}

fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    let listener: std::net::TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn bind_ingest(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&addr.into())?;

    let ingest: std::net::UdpSocket = socket.into();
    ingest.set_nonblocking(true)?;
    Ok(ingest)
}
