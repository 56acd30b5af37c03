// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription commands sent by consumers.
//!
//! Commands are whitespace-separated text lines carried in one frame:
//!
//! ```text
//! subscribe <topic> [<store-and-forward flag>]
//! unsubscribe <topic>
//! ```
//!
//! The store-and-forward flag is accepted for compatibility and ignored.

/// A parsed consumer command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionCommand {
    Subscribe(String),
    Unsubscribe(String),
}

impl SubscriptionCommand {
    /// Parse one command line. Unknown verbs and missing topics yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next()?;
        let topic = tokens.next()?.to_string();

        match verb {
            "subscribe" => Some(Self::Subscribe(topic)),
            "unsubscribe" => Some(Self::Unsubscribe(topic)),
            _ => None,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            Self::Subscribe(topic) | Self::Unsubscribe(topic) => topic,
        }
    }
}
