// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream framing.
//!
//! TCP carries no message boundaries; every frame is delimited as:
//!
//! ```text
//! +---------+-------------+----------------+------------------+
//! | type 1B | slot (2B BE)| length (4B BE) | payload          |
//! +---------+-------------+----------------+------------------+
//! ```
//!
//! The decoder keeps partial-read state, so a read timeout in the middle
//! of a frame loses nothing; the next call resumes where the stream
//! stopped.

use super::{Result, StreamError};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Frame header size: type + slot + length.
pub const FRAME_HEADER_SIZE: usize = 7;

/// Upper bound of one frame payload (anti-OOM guard).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame types on the stream wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Client request frame.
    RequestPayload = 1,
    /// Client announces session termination.
    RequestBye = 2,
    /// Response body.
    ResponseBody = 10,
    /// Response head, always before the body.
    ResponseBodyHead = 11,
    /// One committed chunk of a data channel.
    ResponseChannelData = 12,
    /// Diagnostic (error) response.
    ResponseDiagnostic = 13,
    /// Acknowledgement of a client bye.
    ResponseByeOk = 14,
    /// Server-side session end notice.
    ResponseBye = 15,
}

impl FrameType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::RequestPayload),
            2 => Some(Self::RequestBye),
            10 => Some(Self::ResponseBody),
            11 => Some(Self::ResponseBodyHead),
            12 => Some(Self::ResponseChannelData),
            13 => Some(Self::ResponseDiagnostic),
            14 => Some(Self::ResponseByeOk),
            15 => Some(Self::ResponseBye),
            _ => None,
        }
    }
}

/// One decoded stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub frame_type: FrameType,
    pub slot: u16,
    pub payload: Vec<u8>,
}

/// Encode one frame into a contiguous buffer.
#[must_use]
pub fn encode_frame(frame_type: FrameType, slot: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.push(frame_type as u8);
    frame.extend_from_slice(&slot.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental frame decoder with partial-read state.
#[derive(Debug, Default)]
pub(super) struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub(super) fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take one complete frame off the buffer, if present.
    pub(super) fn try_decode(&mut self) -> Result<Option<StreamFrame>> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let frame_type = FrameType::from_u8(self.buf[0])
            .ok_or_else(|| StreamError::Protocol(format!("unknown frame type {}", self.buf[0])))?;
        let slot = u16::from_be_bytes([self.buf[1], self.buf[2]]);
        let len =
            u32::from_be_bytes([self.buf[3], self.buf[4], self.buf[5], self.buf[6]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(StreamError::Protocol(format!(
                "frame of {len} bytes exceeds the limit"
            )));
        }
        if self.buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }
        let payload = self.buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len].to_vec();
        self.buf.drain(..FRAME_HEADER_SIZE + len);
        Ok(Some(StreamFrame {
            frame_type,
            slot,
            payload,
        }))
    }
}

/// A framed, bidirectional session socket.
///
/// Reads happen on the session's worker thread only; writes are
/// serialized under a lock because responses complete from scheduler
/// threads as well.
pub struct StreamSocket {
    reader: Mutex<(TcpStream, FrameDecoder)>,
    writer: Mutex<TcpStream>,
    peer: String,
    closed: AtomicBool,
}

impl StreamSocket {
    /// Wrap a connected stream.
    ///
    /// # Errors
    ///
    /// Fails when the stream cannot be duplicated for the write side.
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new((stream, FrameDecoder::default())),
            writer: Mutex::new(writer),
            peer,
            closed: AtomicBool::new(false),
        })
    }

    /// Peer address, for session info.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Read the next frame, waiting up to `timeout`.
    ///
    /// `Ok(None)` means the window elapsed without a complete frame;
    /// partially read frames are kept for the next call.
    ///
    /// # Errors
    ///
    /// I/O failures (including EOF) and protocol violations.
    pub fn read_frame(&self, timeout: Duration) -> Result<Option<StreamFrame>> {
        let mut guard = self.reader.lock();
        let (stream, decoder) = &mut *guard;

        if let Some(frame) = decoder.try_decode()? {
            return Ok(Some(frame));
        }

        stream.set_read_timeout(Some(timeout))?;
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(StreamError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed",
                    )))
                }
                Ok(n) => {
                    decoder.extend(&chunk[..n]);
                    if let Some(frame) = decoder.try_decode()? {
                        return Ok(Some(frame));
                    }
                    // keep reading: the rest of the frame may already be
                    // in flight
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                Err(e) => return Err(StreamError::Io(e)),
            }
        }
    }

    /// Write one frame.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    pub fn send(&self, frame_type: FrameType, slot: u16, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(frame_type, slot, payload);
        let mut writer = self.writer.lock();
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Shut the connection down in both directions.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.writer.lock().shutdown(Shutdown::Both);
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
