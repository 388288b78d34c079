// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-process connection admission queue.
//!
//! Client processes claim a slot, post a connect request, and wait for the
//! listener to accept or reject it. The whole exchange lives in one shared
//! memory segment named after the database.
//!
//! # Memory Layout (ABI)
//!
//! ```text
//! +-----------------------------------------------------------+
//! | QueueHeader (64 bytes, cache-aligned)                     |
//! +-----------------------------------------------------------+
//! | QueueSlot[0..capacity + admin_slots]  (64 bytes each)     |
//! +-----------------------------------------------------------+
//! ```
//!
//! Slots `[0, capacity)` serve ordinary connect requests, slots
//! `[capacity, capacity + admin_slots)` are reserved for administrative
//! requests; neither class ever borrows from the other.
//!
//! Two semaphore-like counters coordinate the handshake: `requests`
//! counts posted connect requests (the listener blocks on it), `answers`
//! is bumped on every accept or reject (waiting clients re-check their
//! slot). Session ids come from the monotonic `session_counter` and are
//! never zero and never reused.

use super::{IpcError, Result};
use crate::shm::{connection_segment_name, EventCell, SemaphoreCell, ShmError, ShmSegment};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Session id a rejected client observes.
pub const REJECTED_SESSION: u64 = u64::MAX;

const STATE_FREE: u32 = 0;
const STATE_REQUESTED: u32 = 1;
const STATE_LISTENED: u32 = 2;
const STATE_ACCEPTED: u32 = 3;
const STATE_REJECTED: u32 = 4;

/// Queue header, one cache line. Part of the ABI.
#[repr(C, align(64))]
struct QueueHeader {
    magic: u32,
    version: u32,
    capacity: u32,
    admin_slots: u32,
    session_counter: AtomicU64,
    terminated: AtomicU32,
    terminate_confirmed: AtomicU32,
    requests: SemaphoreCell,
    answers: EventCell,
    _pad: [u8; 24],
}

impl QueueHeader {
    const MAGIC: u32 = 0x5051_4955; // "PQIU"
    const VERSION: u32 = 1;
}

/// One admission slot, one cache line. Part of the ABI.
#[repr(C, align(64))]
struct QueueSlot {
    state: AtomicU32,
    _pad0: u32,
    session_id: AtomicU64,
    _pad1: [u8; 48],
}

const fn queue_segment_size(capacity: usize, admin_slots: usize) -> usize {
    std::mem::size_of::<QueueHeader>()
        + (capacity + admin_slots) * std::mem::size_of::<QueueSlot>()
}

/// A claimed slot awaiting the listener's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTicket {
    index: usize,
}

impl SlotTicket {
    /// Slot index the ticket stands for.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// View of the shared connection queue.
///
/// Server and client processes hold the same type over the same mapping;
/// `last_listened` is process-local listener state.
pub struct ConnectionQueue {
    segment: ShmSegment,
    last_listened: AtomicUsize,
}

impl ConnectionQueue {
    fn header(&self) -> &QueueHeader {
        // SAFETY: the segment starts with a QueueHeader; the mapping
        // outlives self and all fields are atomics or written once at
        // creation.
        unsafe { &*(self.segment.as_ptr() as *const QueueHeader) }
    }

    fn slot(&self, index: usize) -> &QueueSlot {
        debug_assert!(index < self.total_slots());
        // SAFETY: index is within the slot array sized at creation; slots
        // are reached only through atomics.
        unsafe {
            &*(self
                .segment
                .as_ptr()
                .add(std::mem::size_of::<QueueHeader>()) as *const QueueSlot)
                .add(index)
        }
    }

    /// Number of ordinary connection slots (N).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.header().capacity as usize
    }

    /// Number of reserved administrative slots (A).
    #[must_use]
    pub fn admin_slots(&self) -> usize {
        self.header().admin_slots as usize
    }

    fn total_slots(&self) -> usize {
        self.capacity() + self.admin_slots()
    }

    // ----- client side ----------------------------------------------------

    /// Claim an ordinary slot and post the connect request.
    ///
    /// # Errors
    ///
    /// `IpcError::ResourceLimit` when all N ordinary slots are
    /// outstanding. Administrative slots are never handed out here.
    pub fn request(&self) -> Result<SlotTicket> {
        self.claim(0, self.capacity())
    }

    /// Claim a slot from the administrative reservation only.
    ///
    /// # Errors
    ///
    /// `IpcError::ResourceLimit` when all A administrative slots are
    /// outstanding.
    pub fn request_admin(&self) -> Result<SlotTicket> {
        self.claim(self.capacity(), self.total_slots())
    }

    fn claim(&self, from: usize, to: usize) -> Result<SlotTicket> {
        for index in from..to {
            if self.slot(index)
                .state
                .compare_exchange(
                    STATE_FREE,
                    STATE_REQUESTED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.header().requests.post();
                return Ok(SlotTicket { index });
            }
        }
        Err(IpcError::ResourceLimit(to - from))
    }

    /// Block until the listener answers the ticket.
    ///
    /// Returns the assigned session id, or [`REJECTED_SESSION`] when the
    /// request was rejected or the queue terminated.
    #[must_use]
    pub fn wait(&self, ticket: SlotTicket) -> u64 {
        let slot = self.slot(ticket.index);
        loop {
            match slot.state.load(Ordering::Acquire) {
                STATE_ACCEPTED => return slot.session_id.load(Ordering::Acquire),
                STATE_REJECTED => {
                    slot.state.store(STATE_FREE, Ordering::Release);
                    return REJECTED_SESSION;
                }
                _ => {
                    if self.is_terminated() {
                        return REJECTED_SESSION;
                    }
                    let seen = self.header().answers.snapshot();
                    let state = slot.state.load(Ordering::Acquire);
                    if state == STATE_ACCEPTED || state == STATE_REJECTED {
                        continue;
                    }
                    self.header()
                        .answers
                        .wait(seen, Some(Duration::from_millis(100)));
                }
            }
        }
    }

    // ----- server side ----------------------------------------------------

    /// Block until a connect request arrives, returning the freshly
    /// assigned session id. `None` once termination was requested.
    #[must_use]
    pub fn listen(&self) -> Option<u64> {
        loop {
            if self.is_terminated() {
                return None;
            }
            if !self.header().requests.wait(Some(Duration::from_millis(100))) {
                continue;
            }
            if let Some(session_id) = self.take_requested_slot() {
                return Some(session_id);
            }
        }
    }

    /// Non-blocking variant of [`ConnectionQueue::listen`].
    #[must_use]
    pub fn try_listen(&self) -> Option<u64> {
        if self.is_terminated() || !self.header().requests.wait(Some(Duration::ZERO)) {
            return None;
        }
        self.take_requested_slot()
    }

    fn take_requested_slot(&self) -> Option<u64> {
        for index in 0..self.total_slots() {
            if self.slot(index)
                .state
                .compare_exchange(
                    STATE_REQUESTED,
                    STATE_LISTENED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.last_listened.store(index, Ordering::Release);
                let session_id = self.header().session_counter.fetch_add(1, Ordering::AcqRel) + 1;
                return Some(session_id);
            }
        }
        None
    }

    /// Slot index belonging to the most recent [`ConnectionQueue::listen`].
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.last_listened.load(Ordering::Acquire)
    }

    /// Complete the handshake: hand the session id to the waiting client.
    pub fn accept(&self, index: usize, session_id: u64) {
        let slot = self.slot(index);
        slot.session_id.store(session_id, Ordering::Release);
        slot.state.store(STATE_ACCEPTED, Ordering::Release);
        self.header().answers.signal();
    }

    /// Turn the waiting client away; its `wait` observes the sentinel.
    pub fn reject(&self, index: usize) {
        self.slot(index).state.store(STATE_REJECTED, Ordering::Release);
        self.header().answers.signal();
    }

    /// Return an accepted slot to the pool once its session ended.
    pub fn release_slot(&self, index: usize) {
        self.slot(index).state.store(STATE_FREE, Ordering::Release);
    }

    /// Announce cooperative teardown and wake every waiter.
    pub fn request_terminate(&self) {
        self.header().terminated.store(1, Ordering::Release);
        self.header().requests.interrupt_all();
        self.header().answers.signal();
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.header().terminated.load(Ordering::Acquire) != 0
    }

    /// Listener-side acknowledgement that draining finished; after this
    /// the segment may be unlinked.
    pub fn confirm_terminated(&self) {
        self.header().terminate_confirmed.store(1, Ordering::Release);
    }

    #[must_use]
    pub fn is_terminate_confirmed(&self) -> bool {
        self.header().terminate_confirmed.load(Ordering::Acquire) != 0
    }
}

/// Owner of the connection queue segment.
///
/// The server process creates the container (and unlinks the segment on
/// drop); client processes connect to an existing one.
pub struct ConnectionContainer {
    queue: ConnectionQueue,
    owned: bool,
}

impl ConnectionContainer {
    /// Create the queue segment for a database.
    ///
    /// # Errors
    ///
    /// Propagates segment creation failures.
    pub fn create(database_name: &str, capacity: usize, admin_slots: usize) -> Result<Self> {
        let name = connection_segment_name(database_name);
        let segment = ShmSegment::create(&name, queue_segment_size(capacity, admin_slots))?;

        // SAFETY: the freshly created segment is zero-filled, large enough
        // for the header, and no peer can attach before shm_open completes
        // on their side.
        unsafe {
            let header = segment.as_ptr() as *mut QueueHeader;
            (*header).magic = QueueHeader::MAGIC;
            (*header).version = QueueHeader::VERSION;
            (*header).capacity = capacity as u32;
            (*header).admin_slots = admin_slots as u32;
        }

        log::info!(
            "connection queue {name} created: {capacity} slots + {admin_slots} admin"
        );
        Ok(Self {
            queue: ConnectionQueue {
                segment,
                last_listened: AtomicUsize::new(0),
            },
            owned: true,
        })
    }

    /// Connect to the queue of a running server.
    ///
    /// # Errors
    ///
    /// `ShmError::NotFound` when no server owns the database name, or
    /// `ShmError::Corruption` when the header does not validate.
    pub fn connect(database_name: &str) -> Result<Self> {
        let name = connection_segment_name(database_name);

        // the header carries the slot counts, so map it first and then
        // remap the full segment
        let (capacity, admin_slots) = {
            let probe = ShmSegment::open(&name, std::mem::size_of::<QueueHeader>())?;
            // SAFETY: the mapping covers at least one QueueHeader.
            let header = unsafe { &*(probe.as_ptr() as *const QueueHeader) };
            if header.magic != QueueHeader::MAGIC || header.version != QueueHeader::VERSION {
                return Err(IpcError::Shm(ShmError::Corruption));
            }
            (header.capacity as usize, header.admin_slots as usize)
        };

        let segment = ShmSegment::open(&name, queue_segment_size(capacity, admin_slots))?;
        Ok(Self {
            queue: ConnectionQueue {
                segment,
                last_listened: AtomicUsize::new(0),
            },
            owned: false,
        })
    }

    #[must_use]
    pub fn connection_queue(&self) -> &ConnectionQueue {
        &self.queue
    }
}

impl Drop for ConnectionContainer {
    fn drop(&mut self) {
        if self.owned {
            ShmSegment::unlink(self.queue.segment.name()).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn unique_db(tag: &str) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("portico_cq_{tag}_{ts}")
    }

    #[test]
    fn header_and_slot_are_cache_lines() {
        assert_eq!(std::mem::size_of::<QueueHeader>(), 64);
        assert_eq!(std::mem::size_of::<QueueSlot>(), 64);
    }

    #[test]
    fn accept_hands_out_monotonic_session_ids() {
        let db = unique_db("accept");
        let container = Arc::new(ConnectionContainer::create(&db, 4, 1).expect("create"));

        let listener = {
            let container = Arc::clone(&container);
            thread::spawn(move || {
                let queue = container.connection_queue();
                let mut ids = Vec::new();
                while ids.len() < 3 {
                    let Some(session_id) = queue.listen() else {
                        break;
                    };
                    queue.accept(queue.slot_index(), session_id);
                    ids.push(session_id);
                }
                ids
            })
        };

        let queue = container.connection_queue();
        let mut granted = Vec::new();
        for _ in 0..3 {
            let ticket = queue.request().expect("slot");
            granted.push(queue.wait(ticket));
        }

        let listened = listener.join().expect("listener");
        assert_eq!(granted, listened);
        assert_eq!(granted, vec![1, 2, 3]);
    }

    #[test]
    fn normal_slots_exhaust_independently_of_admin() {
        let db = unique_db("limit");
        let container = ConnectionContainer::create(&db, 2, 1).expect("create");
        let queue = container.connection_queue();

        let _a = queue.request().expect("slot 0");
        let _b = queue.request().expect("slot 1");
        assert!(matches!(queue.request(), Err(IpcError::ResourceLimit(2))));

        // the admin reservation is untouched
        let _c = queue.request_admin().expect("admin slot");
        assert!(matches!(
            queue.request_admin(),
            Err(IpcError::ResourceLimit(1))
        ));
    }

    #[test]
    fn reject_returns_sentinel_and_frees_the_slot() {
        let db = unique_db("reject");
        let container = Arc::new(ConnectionContainer::create(&db, 2, 1).expect("create"));

        let listener = {
            let container = Arc::clone(&container);
            thread::spawn(move || {
                let queue = container.connection_queue();
                let _session_id = queue.listen().expect("request");
                queue.reject(queue.slot_index());
            })
        };

        let queue = container.connection_queue();
        let ticket = queue.request().expect("slot");
        assert_eq!(queue.wait(ticket), REJECTED_SESSION);
        listener.join().expect("listener");

        // rejected slot is free again
        let _again = queue.request().expect("slot reusable");
    }

    #[test]
    fn release_slot_returns_capacity() {
        let db = unique_db("release");
        let container = Arc::new(ConnectionContainer::create(&db, 1, 0).expect("create"));
        let queue = container.connection_queue();

        let ticket = queue.request().expect("slot");
        assert!(matches!(queue.request(), Err(IpcError::ResourceLimit(1))));

        let listener = {
            let container = Arc::clone(&container);
            thread::spawn(move || {
                let queue = container.connection_queue();
                let session_id = queue.listen().expect("request");
                queue.accept(queue.slot_index(), session_id);
                queue.slot_index()
            })
        };
        let session_id = queue.wait(ticket);
        assert_eq!(session_id, 1);
        let index = listener.join().expect("listener");

        queue.release_slot(index);
        let _again = queue.request().expect("slot back in the pool");
    }

    #[test]
    fn terminate_wakes_listener() {
        let db = unique_db("term");
        let container = Arc::new(ConnectionContainer::create(&db, 2, 1).expect("create"));

        let listener = {
            let container = Arc::clone(&container);
            thread::spawn(move || {
                let queue = container.connection_queue();
                let result = queue.listen();
                queue.confirm_terminated();
                result
            })
        };

        thread::sleep(Duration::from_millis(20));
        container.connection_queue().request_terminate();
        assert_eq!(listener.join().expect("listener"), None);
        assert!(container.connection_queue().is_terminate_confirmed());
    }

    #[test]
    fn connect_sees_the_created_queue() {
        let db = unique_db("connect");
        let server = ConnectionContainer::create(&db, 3, 2).expect("create");
        let client = ConnectionContainer::connect(&db).expect("connect");
        assert_eq!(client.connection_queue().capacity(), 3);
        assert_eq!(client.connection_queue().admin_slots(), 2);
        drop(client);
        drop(server);
    }

    #[test]
    fn connect_to_missing_database_fails() {
        let result = ConnectionContainer::connect("portico_cq_no_such_db");
        assert!(matches!(
            result,
            Err(IpcError::Shm(ShmError::NotFound(_)))
        ));
    }
}
