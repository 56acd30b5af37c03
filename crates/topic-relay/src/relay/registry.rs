// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer registry: identities, connections and topic interests.

use std::collections::{HashMap, HashSet};
use std::fmt;

/// Longest consumer id accepted at handshake, in bytes.
pub const MAX_ID_LEN: usize = 10;

/// Identity of a connection inside the relay (its poll token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connected consumer.
#[derive(Debug)]
pub struct Consumer<C> {
    id: String,
    connection: C,
    topics: HashSet<String>,
}

impl<C> Consumer<C> {
    fn new(id: String, connection: C) -> Self {
        Self {
            id,
            connection,
            topics: HashSet::new(),
        }
    }

    /// Consumer id declared at handshake.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check whether the consumer wants `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Release the record, keeping only the connection.
    pub fn into_connection(self) -> C {
        self.connection
    }
}

/// Result of a handshake.
#[derive(Debug)]
pub enum Handshake<C> {
    /// A consumer record was created.
    Accepted,

    /// Another consumer already holds this id; the connection is handed back
    /// so the caller can close it.
    RejectedDuplicate(C),

    /// The id is empty or longer than [`MAX_ID_LEN`] bytes.
    RejectedInvalid(C),
}

/// Normalise the id carried by a handshake frame. Only surrounding
/// whitespace is dropped; ids are never shortened, so distinct ids stay
/// distinct.
pub fn normalize_id(raw: &str) -> String {
    raw.trim().to_string()
}

/// Check whether `id` can name a consumer.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_ID_LEN
}

/// Registry of connected consumers, keyed by connection.
#[derive(Debug)]
pub struct ClientRegistry<C> {
    consumers: HashMap<ConnectionId, Consumer<C>>,
}

impl<C> ClientRegistry<C> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            consumers: HashMap::new(),
        }
    }

    /// Register `connection` under `declared_id` unless that id is invalid
    /// or taken. The id is compared exactly as given.
    pub fn handshake(
        &mut self,
        handle: ConnectionId,
        connection: C,
        declared_id: &str,
    ) -> Handshake<C> {
        if !is_valid_id(declared_id) {
            return Handshake::RejectedInvalid(connection);
        }
        if self.contains_id(declared_id) {
            return Handshake::RejectedDuplicate(connection);
        }
        self.consumers
            .insert(handle, Consumer::new(declared_id.to_string(), connection));
        Handshake::Accepted
    }

    /// Add `topic` to the consumer's interests.
    ///
    /// Returns `true` if the topic was newly added.
    pub fn subscribe(&mut self, handle: ConnectionId, topic: &str) -> bool {
        match self.consumers.get_mut(&handle) {
            Some(consumer) => consumer.topics.insert(topic.to_string()),
            None => false,
        }
    }

    /// Remove `topic` from the consumer's interests.
    ///
    /// Returns `true` if the topic was present.
    pub fn unsubscribe(&mut self, handle: ConnectionId, topic: &str) -> bool {
        match self.consumers.get_mut(&handle) {
            Some(consumer) => consumer.topics.remove(topic),
            None => false,
        }
    }

    /// Remove a consumer, returning its record (connection and topics).
    pub fn disconnect(&mut self, handle: ConnectionId) -> Option<Consumer<C>> {
        self.consumers.remove(&handle)
    }

    /// Check whether any consumer holds `id`.
    pub fn contains_id(&self, id: &str) -> bool {
        self.consumers.values().any(|c| c.id == id)
    }

    pub fn get(&self, handle: ConnectionId) -> Option<&Consumer<C>> {
        self.consumers.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ConnectionId) -> Option<&mut Consumer<C>> {
        self.consumers.get_mut(&handle)
    }

    /// Iterate consumers mutably (dispatch order is unspecified).
    pub fn consumers_mut(&mut self) -> impl Iterator<Item = (ConnectionId, &mut Consumer<C>)> {
        self.consumers.iter_mut().map(|(h, c)| (*h, c))
    }

    /// Remove every consumer.
    pub fn drain(&mut self) -> impl Iterator<Item = (ConnectionId, Consumer<C>)> + '_ {
        self.consumers.drain()
    }

    /// Number of registered consumers.
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

impl<C> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
