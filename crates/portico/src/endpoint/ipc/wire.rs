// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-session shared-memory wire.
//!
//! Each accepted IPC session owns the segment
//! `/<database_name>-<session_id>`:
//!
//! ```text
//! +--------------------------------------------------+
//! | WireHeader (64 bytes)                            |
//! +--------------------------------------------------+
//! | request ring   (client -> server)                |
//! +--------------------------------------------------+
//! | response ring  (server -> client)                |
//! +--------------------------------------------------+
//! ```
//!
//! Records on both rings are frames: 1-byte kind, 2-byte slot, payload.
//! The response ring has one consumer but many producers (scheduler
//! threads complete responses); pushes are serialized by a process-local
//! lock in the server.
//!
//! The header carries the result-set garbage collection area: a count of
//! channel chunks the client has not consumed yet. A graceful session
//! shutdown holds the wire open until the count drains to zero.

use super::{IpcError, Result};
use crate::shm::{
    ring_segment_size, session_segment_name, ShmRecordRing, ShmSegment,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Data capacity of the request ring.
pub const REQUEST_RING_CAPACITY: usize = 1 << 16;

/// Data capacity of the response ring.
pub const RESPONSE_RING_CAPACITY: usize = 1 << 18;

/// Wire header, one cache line. Part of the ABI.
#[repr(C, align(64))]
struct WireHeader {
    magic: u32,
    version: u32,
    closed: AtomicU32,
    _pad0: u32,
    /// Result-set GC area: channel chunks written but not yet consumed.
    resultset_outstanding: AtomicU64,
    _pad1: [u8; 40],
}

impl WireHeader {
    const MAGIC: u32 = 0x5057_4952; // "PWIR"
    const VERSION: u32 = 1;
}

const WIRE_HEADER_SIZE: usize = std::mem::size_of::<WireHeader>();

const fn wire_segment_size() -> usize {
    WIRE_HEADER_SIZE
        + ring_segment_size(REQUEST_RING_CAPACITY)
        + ring_segment_size(RESPONSE_RING_CAPACITY)
}

/// Frame kinds on the session wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
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

impl FrameKind {
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

/// One decoded wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    pub kind: FrameKind,
    pub slot: u16,
    pub payload: Vec<u8>,
}

fn encode_frame(kind: FrameKind, slot: u16, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(3 + payload.len());
    record.push(kind as u8);
    record.extend_from_slice(&slot.to_le_bytes());
    record.extend_from_slice(payload);
    record
}

fn decode_frame(record: &[u8]) -> Result<WireFrame> {
    if record.len() < 3 {
        return Err(IpcError::Protocol("frame shorter than its header".into()));
    }
    let kind = FrameKind::from_u8(record[0])
        .ok_or_else(|| IpcError::Protocol(format!("unknown frame kind {}", record[0])))?;
    let slot = u16::from_le_bytes([record[1], record[2]]);
    Ok(WireFrame {
        kind,
        slot,
        payload: record[3..].to_vec(),
    })
}

struct WireView {
    segment: ShmSegment,
    request_ring: ShmRecordRing,
    response_ring: ShmRecordRing,
}

impl WireView {
    fn header(&self) -> &WireHeader {
        // SAFETY: the segment starts with a WireHeader and outlives self.
        unsafe { &*(self.segment.as_ptr() as *const WireHeader) }
    }
}

/// Server half of a session wire. Owns the segment.
pub struct ServerWire {
    view: WireView,
    response_lock: Mutex<()>,
}

impl ServerWire {
    /// Create the wire segment for a freshly accepted session.
    ///
    /// # Errors
    ///
    /// Propagates segment creation failures.
    pub fn create(database_name: &str, session_id: u64) -> Result<Self> {
        let name = session_segment_name(database_name, session_id);
        let segment = ShmSegment::create(&name, wire_segment_size())?;

        // SAFETY: the segment is zero-filled, sized by wire_segment_size,
        // and exclusive until the client attaches after the accept.
        let (request_ring, response_ring) = unsafe {
            let base = segment.as_ptr();
            let header = base as *mut WireHeader;
            (*header).magic = WireHeader::MAGIC;
            (*header).version = WireHeader::VERSION;

            let request_base = base.add(WIRE_HEADER_SIZE);
            let response_base = request_base.add(ring_segment_size(REQUEST_RING_CAPACITY));
            (
                ShmRecordRing::create_at(request_base, REQUEST_RING_CAPACITY),
                ShmRecordRing::create_at(response_base, RESPONSE_RING_CAPACITY),
            )
        };

        Ok(Self {
            view: WireView {
                segment,
                request_ring,
                response_ring,
            },
            response_lock: Mutex::new(()),
        })
    }

    /// Wait for the next client frame.
    #[must_use]
    pub fn receive(&self, timeout: Duration) -> Option<Result<WireFrame>> {
        let record = self.view.request_ring.pop(Some(timeout))?;
        Some(decode_frame(&record))
    }

    /// Push one response frame. Serialized across producer threads.
    ///
    /// # Errors
    ///
    /// `ShmError::RecordTooLarge` when the frame exceeds the ring.
    pub fn send(&self, kind: FrameKind, slot: u16, payload: &[u8]) -> Result<()> {
        let _guard = self.response_lock.lock();
        self.view
            .response_ring
            .push(&encode_frame(kind, slot, payload))?;
        Ok(())
    }

    /// Record a channel chunk handed to the client but not yet consumed.
    pub fn gc_register_chunk(&self) {
        self.view
            .header()
            .resultset_outstanding
            .fetch_add(1, Ordering::AcqRel);
    }

    /// Attempt result-set collection: true when every chunk was consumed.
    #[must_use]
    pub fn gc_dump(&self) -> bool {
        self.view.header().resultset_outstanding.load(Ordering::Acquire) == 0
    }

    /// Mark the wire closed and wake a blocked client.
    pub fn close(&self) {
        self.view.header().closed.store(1, Ordering::Release);
        self.view.request_ring.notify_readers();
        self.view.response_ring.notify_readers();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.view.header().closed.load(Ordering::Acquire) != 0
    }

    /// Segment name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        self.view.segment.name()
    }
}

impl Drop for ServerWire {
    fn drop(&mut self) {
        ShmSegment::unlink(self.view.segment.name()).ok();
    }
}

/// Client half of a session wire.
pub struct WireClient {
    view: WireView,
}

impl WireClient {
    /// Attach to the wire of an accepted session.
    ///
    /// # Errors
    ///
    /// `ShmError::NotFound` when the server has not created (or already
    /// removed) the segment, `ShmError::Corruption` on a bad header.
    pub fn connect(database_name: &str, session_id: u64) -> Result<Self> {
        let name = session_segment_name(database_name, session_id);
        let segment = ShmSegment::open(&name, wire_segment_size())?;

        // SAFETY: the server initialized header and rings before accepting
        // the session; attach validates the ring headers.
        let view = unsafe {
            let base = segment.as_ptr();
            let header = &*(base as *const WireHeader);
            if header.magic != WireHeader::MAGIC || header.version != WireHeader::VERSION {
                return Err(IpcError::Shm(crate::shm::ShmError::Corruption));
            }
            let request_base = base.add(WIRE_HEADER_SIZE);
            let response_base = request_base.add(ring_segment_size(REQUEST_RING_CAPACITY));
            WireView {
                request_ring: ShmRecordRing::attach(request_base)?,
                response_ring: ShmRecordRing::attach(response_base)?,
                segment,
            }
        };
        Ok(Self { view })
    }

    /// Send one request frame.
    ///
    /// # Errors
    ///
    /// `ShmError::RecordTooLarge` when the frame exceeds the ring.
    pub fn send(&self, slot: u16, payload: &[u8]) -> Result<()> {
        self.view
            .request_ring
            .push(&encode_frame(FrameKind::RequestPayload, slot, payload))?;
        Ok(())
    }

    /// Announce session termination.
    ///
    /// # Errors
    ///
    /// See [`WireClient::send`].
    pub fn send_bye(&self) -> Result<()> {
        self.view
            .request_ring
            .push(&encode_frame(FrameKind::RequestBye, 0, &[]))?;
        Ok(())
    }

    /// Wait for the next response frame. Consuming a channel-data frame
    /// releases its chunk from the server's result-set GC.
    #[must_use]
    pub fn receive(&self, timeout: Duration) -> Option<Result<WireFrame>> {
        let record = self.view.response_ring.pop(Some(timeout))?;
        let frame = decode_frame(&record);
        if let Ok(f) = &frame {
            if f.kind == FrameKind::ResponseChannelData {
                self.view
                    .header()
                    .resultset_outstanding
                    .fetch_sub(1, Ordering::AcqRel);
            }
        }
        Some(frame)
    }

    /// Whether the server marked the wire closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.view.header().closed.load(Ordering::Acquire) != 0
    }
}
