// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fan-out of decoded measurements to subscribed consumers.

use super::connection::FrameSink;
use super::registry::{ClientRegistry, ConnectionId, Consumer};
use crate::frame::{encode_frame, FrameError};
use crate::measurement::Measurement;
use std::io;

/// A consumer removed because delivery failed.
#[derive(Debug)]
pub struct FailedDelivery<C> {
    pub handle: ConnectionId,
    pub consumer: Consumer<C>,
    pub error: io::Error,
}

/// Outcome of one dispatch.
#[derive(Debug)]
pub struct DispatchReport<C> {
    /// Consumers the frame was queued to.
    pub delivered: usize,

    /// Consumers disconnected during this dispatch.
    pub failed: Vec<FailedDelivery<C>>,
}

/// Deliver `measurement` once to every consumer subscribed to its topic.
///
/// A consumer whose delivery fails is removed from the registry and returned
/// in the report; the remaining consumers are still served.
pub fn dispatch<C: FrameSink>(
    registry: &mut ClientRegistry<C>,
    measurement: &Measurement,
) -> Result<DispatchReport<C>, FrameError> {
    let frame = encode_frame(&measurement.line())?;
    let topic = measurement.topic();

    let mut delivered = 0;
    let mut broken = Vec::new();
    for (handle, consumer) in registry.consumers_mut() {
        if !consumer.is_subscribed(topic) {
            continue;
        }
        match consumer.connection_mut().send_frame(&frame) {
            Ok(()) => delivered += 1,
            Err(error) => broken.push((handle, error)),
        }
    }

    let failed = broken
        .into_iter()
        .filter_map(|(handle, error)| {
            registry.disconnect(handle).map(|consumer| FailedDelivery {
                handle,
                consumer,
                error,
            })
        })
        .collect();

    Ok(DispatchReport { delivered, failed })
}
