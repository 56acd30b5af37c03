// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer connection handling.
//!
//! Sockets are non-blocking. Inbound bytes are cut into fixed-size frames;
//! outbound frames go through a bounded send queue that is flushed on
//! writable events, so a stalled consumer can never block the event loop.

use crate::frame::{FrameAccumulator, FRAME_SIZE};
use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// Most frames taken from one connection per [`ConsumerConnection::read_frames`]
/// call, so one busy consumer cannot hold the event loop.
pub const MAX_FRAMES_PER_READ: usize = 64;

/// Something frames can be delivered to.
pub trait FrameSink {
    /// Queue one frame for delivery.
    ///
    /// An error means the consumer can no longer be served and must be
    /// disconnected.
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Frames read during one readable event.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Complete frames, in arrival order.
    pub frames: Vec<Vec<u8>>,

    /// Peer closed its side (zero-length read).
    pub closed: bool,

    /// Stopped at [`MAX_FRAMES_PER_READ`]; the socket may hold more data.
    pub more: bool,
}

/// A consumer stream with framing and a bounded send queue.
#[derive(Debug)]
pub struct ConsumerConnection<S = TcpStream> {
    stream: S,
    peer_addr: SocketAddr,
    inbound: FrameAccumulator,
    send_queue: Vec<u8>,
    send_offset: usize,
    max_pending_bytes: usize,
}

impl<S: Read + Write> ConsumerConnection<S> {
    /// Wrap a connected stream. At most `max_pending_frames` frames may wait
    /// in the send queue.
    pub fn new(stream: S, peer_addr: SocketAddr, max_pending_frames: usize) -> Self {
        Self {
            stream,
            peer_addr,
            inbound: FrameAccumulator::new(),
            send_queue: Vec::new(),
            send_offset: 0,
            max_pending_bytes: max_pending_frames * FRAME_SIZE,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Bytes queued but not yet written.
    pub fn pending_bytes(&self) -> usize {
        self.send_queue.len() - self.send_offset
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Read until the socket would block or [`MAX_FRAMES_PER_READ`] frames
    /// are complete.
    ///
    /// Frames are split off as bytes arrive, so at most one partial frame
    /// stays buffered.
    pub fn read_frames(&mut self) -> io::Result<ReadOutcome> {
        let mut buf = [0u8; FRAME_SIZE];
        let mut outcome = ReadOutcome::default();

        while outcome.frames.len() < MAX_FRAMES_PER_READ {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    outcome.closed = true;
                    return Ok(outcome);
                }
                Ok(n) => {
                    self.inbound.feed(&buf[..n]);
                    while let Some(frame) = self.inbound.next_frame() {
                        outcome.frames.push(frame);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(outcome),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        outcome.more = true;
        Ok(outcome)
    }

    /// Write as much of the send queue as the socket accepts.
    pub fn flush(&mut self) -> io::Result<()> {
        while self.send_offset < self.send_queue.len() {
            match self.stream.write(&self.send_queue[self.send_offset..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned 0",
                    ))
                }
                Ok(n) => self.send_offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.send_queue.clear();
        self.send_offset = 0;
        Ok(())
    }
}

impl<S: Read + Write> FrameSink for ConsumerConnection<S> {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.pending_bytes() + frame.len() > self.max_pending_bytes {
            return Err(io::Error::other(format!(
                "send queue full ({} bytes pending)",
                self.pending_bytes()
            )));
        }

        if self.send_offset > 0 {
            self.send_queue.drain(..self.send_offset);
            self.send_offset = 0;
        }
        self.send_queue.extend_from_slice(frame);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_frame, frame_text};
    use std::collections::VecDeque;

    /// In-memory non-blocking stream.
    #[derive(Default)]
    struct MockStream {
        input: VecDeque<u8>,
        eof: bool,
        written: Vec<u8>,
        write_budget: Option<usize>,
        broken: bool,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.input.is_empty() {
                return if self.eof {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            }
            let n = buf.len().min(self.input.len());
            for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            let n = match self.write_budget {
                Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
                Some(budget) => budget.min(buf.len()),
                None => buf.len(),
            };
            if let Some(budget) = self.write_budget.as_mut() {
                *budget -= n;
            }
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn connection(stream: MockStream, max_pending_frames: usize) -> ConsumerConnection<MockStream> {
        ConsumerConnection::new(stream, "127.0.0.1:5000".parse().unwrap(), max_pending_frames)
    }

    #[test]
    fn test_read_whole_frames() {
        let mut stream = MockStream::default();
        stream.input.extend(encode_frame("c1").unwrap());
        stream.input.extend(encode_frame("subscribe temp").unwrap());

        let mut conn = connection(stream, 4);
        let outcome = conn.read_frames().unwrap();

        assert!(!outcome.closed);
        assert_eq!(outcome.frames.len(), 2);
        assert_eq!(frame_text(&outcome.frames[0]), "c1");
        assert_eq!(frame_text(&outcome.frames[1]), "subscribe temp");
    }

    #[test]
    fn test_read_partial_frame_waits_for_rest() {
        let frame = encode_frame("c1").unwrap();
        let mut stream = MockStream::default();
        stream.input.extend(&frame[..100]);

        let mut conn = connection(stream, 4);
        assert!(conn.read_frames().unwrap().frames.is_empty());

        conn.get_mut().input.extend(&frame[100..]);
        let outcome = conn.read_frames().unwrap();
        assert_eq!(outcome.frames.len(), 1);
    }

    #[test]
    fn test_read_detects_close() {
        let mut stream = MockStream::default();
        stream.input.extend(encode_frame("unsubscribe temp").unwrap());
        stream.eof = true;

        let outcome = connection(stream, 4).read_frames().unwrap();
        assert!(outcome.closed);
        assert_eq!(outcome.frames.len(), 1);
    }

    #[test]
    fn test_read_caps_frames_per_call() {
        let mut stream = MockStream::default();
        for i in 0..MAX_FRAMES_PER_READ + 6 {
            stream.input.extend(encode_frame(format!("subscribe t{}", i)).unwrap());
        }

        let mut conn = connection(stream, 4);
        let first = conn.read_frames().unwrap();
        assert_eq!(first.frames.len(), MAX_FRAMES_PER_READ);
        assert!(first.more);
        assert!(conn.inbound.buffered() < FRAME_SIZE);

        let rest = conn.read_frames().unwrap();
        assert_eq!(rest.frames.len(), 6);
        assert!(!rest.more);
        assert_eq!(frame_text(&rest.frames[5]), format!("subscribe t{}", MAX_FRAMES_PER_READ + 5));
    }

    #[test]
    fn test_send_writes_immediately() {
        let mut conn = connection(MockStream::default(), 4);
        let frame = encode_frame("line\n").unwrap();

        conn.send_frame(&frame).unwrap();

        assert_eq!(conn.get_mut().written, frame);
        assert_eq!(conn.pending_bytes(), 0);
    }

    #[test]
    fn test_send_queues_when_socket_full() {
        let stream = MockStream {
            write_budget: Some(FRAME_SIZE / 2),
            ..Default::default()
        };
        let mut conn = connection(stream, 4);
        let frame = encode_frame("line\n").unwrap();

        conn.send_frame(&frame).unwrap();
        assert_eq!(conn.pending_bytes(), FRAME_SIZE / 2);

        // Socket drains, writable event flushes the remainder.
        conn.get_mut().write_budget = None;
        conn.flush().unwrap();
        assert_eq!(conn.pending_bytes(), 0);
        assert_eq!(conn.get_mut().written, frame);
    }

    #[test]
    fn test_send_fails_when_backlog_exceeded() {
        let stream = MockStream {
            write_budget: Some(0),
            ..Default::default()
        };
        let mut conn = connection(stream, 2);
        let frame = encode_frame("line\n").unwrap();

        conn.send_frame(&frame).unwrap();
        conn.send_frame(&frame).unwrap();
        assert!(conn.send_frame(&frame).is_err());
        assert_eq!(conn.pending_bytes(), 2 * FRAME_SIZE);
    }

    #[test]
    fn test_send_fails_on_broken_stream() {
        let stream = MockStream {
            broken: true,
            ..Default::default()
        };
        let mut conn = connection(stream, 4);
        assert!(conn.send_frame(&encode_frame("x").unwrap()).is_err());
    }
}
