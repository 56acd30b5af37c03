// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-size framing for consumer connections.
//!
//! Consumers and the relay exchange NUL-padded text frames of exactly
//! [`FRAME_SIZE`] bytes in both directions:
//!
//! ```text
//! +-------------------------------+----------------------+
//! | Text                          | NUL padding          |
//! +-------------------------------+----------------------+
//! |<------------------ FRAME_SIZE (1600B) -------------->|
//! ```
//!
//! TCP has no message boundaries, so inbound bytes are accumulated in a
//! [`FrameAccumulator`] until a whole frame is available.

use thiserror::Error;

/// Size of every frame on a consumer connection.
pub const FRAME_SIZE: usize = 1600;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Text does not fit in one frame (a terminating NUL is always kept).
    #[error("text too long for frame: {len} bytes")]
    TooLong { len: usize },
}

/// Encode `text` into one NUL-padded frame. Bytes are copied as-is.
pub fn encode_frame(text: impl AsRef<[u8]>) -> Result<Vec<u8>, FrameError> {
    let bytes = text.as_ref();
    if bytes.len() >= FRAME_SIZE {
        return Err(FrameError::TooLong { len: bytes.len() });
    }

    let mut frame = vec![0u8; FRAME_SIZE];
    frame[..bytes.len()].copy_from_slice(bytes);
    Ok(frame)
}

/// Text carried by a frame: everything before the first NUL.
pub fn frame_text(frame: &[u8]) -> String {
    let end = frame.iter().position(|&b| b == 0).unwrap_or(frame.len());
    String::from_utf8_lossy(&frame[..end]).into_owned()
}

/// Accumulates stream bytes and yields whole frames.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buffer: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_SIZE),
        }
    }

    /// Append bytes read from the stream.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buffer.len() < FRAME_SIZE {
            return None;
        }
        let rest = self.buffer.split_off(FRAME_SIZE);
        Some(std::mem::replace(&mut self.buffer, rest))
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pads_to_frame_size() {
        let frame = encode_frame("subscribe temp\n").unwrap();
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(&frame[..15], b"subscribe temp\n");
        assert!(frame[15..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_rejects_oversized_text() {
        let text = "a".repeat(FRAME_SIZE);
        assert_eq!(
            encode_frame(&text),
            Err(FrameError::TooLong { len: FRAME_SIZE })
        );
        assert!(encode_frame(&text[1..]).is_ok());
    }

    #[test]
    fn test_encode_keeps_raw_bytes() {
        let frame = encode_frame([0xB0, b'C', 0xFF]).unwrap();
        assert_eq!(&frame[..3], &[0xB0, b'C', 0xFF]);
        assert_eq!(frame[3], 0);
    }

    #[test]
    fn test_frame_text_stops_at_nul() {
        let frame = encode_frame("sensor-01").unwrap();
        assert_eq!(frame_text(&frame), "sensor-01");
        assert_eq!(frame_text(b"no-terminator"), "no-terminator");
    }

    #[test]
    fn test_accumulator_partial_frames() {
        let frame = encode_frame("hello").unwrap();
        let mut acc = FrameAccumulator::new();

        acc.feed(&frame[..700]);
        assert!(acc.next_frame().is_none());
        assert_eq!(acc.buffered(), 700);

        acc.feed(&frame[700..]);
        let out = acc.next_frame().unwrap();
        assert_eq!(frame_text(&out), "hello");
        assert_eq!(acc.buffered(), 0);
    }

    #[test]
    fn test_accumulator_multiple_frames_in_one_read() {
        let mut data = encode_frame("one").unwrap();
        data.extend(encode_frame("two").unwrap());
        data.extend_from_slice(&encode_frame("three").unwrap()[..10]);

        let mut acc = FrameAccumulator::new();
        acc.feed(&data);

        assert_eq!(frame_text(&acc.next_frame().unwrap()), "one");
        assert_eq!(frame_text(&acc.next_frame().unwrap()), "two");
        assert!(acc.next_frame().is_none());
        assert_eq!(acc.buffered(), 10);
    }
}
