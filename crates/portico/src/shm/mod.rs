// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory primitives for the IPC endpoint.
//!
//! Everything the cross-process side of portico touches lives here: named
//! segments (`shm_open`/`mmap`), SHARED futex wait/wake, and a
//! variable-length record ring used as the per-session request/response
//! wire.
//!
//! Segment naming: the connection queue occupies `/<database_name>`, each
//! session wire `/<database_name>-<session_id>`. The in-memory layouts are
//! `#[repr(C)]` and treated as ABI: existing clients map the same regions.

mod futex;
mod ring;
mod segment;

pub use futex::{futex_wait, futex_wake, futex_wake_all, EventCell, SemaphoreCell};
pub use ring::{ring_segment_size, ShmRecordRing, RING_HEADER_SIZE};
pub use segment::{cleanup_database_segments, ShmSegment};

use std::io;
use thiserror::Error;

/// Errors raised by the shared memory layer.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("shared memory segment creation failed: {0}")]
    SegmentCreate(#[source] io::Error),

    #[error("shared memory segment open failed: {0}")]
    SegmentOpen(#[source] io::Error),

    #[error("memory mapping failed: {0}")]
    Mmap(#[source] io::Error),

    #[error("invalid segment name: {0}")]
    InvalidName(String),

    #[error("segment not found: {0}")]
    NotFound(String),

    #[error("record of {size} bytes exceeds ring capacity {capacity}")]
    RecordTooLarge { size: usize, capacity: usize },

    #[error("segment header corrupted or version mismatch")]
    Corruption,
}

/// Result type for shared memory operations.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Segment name of the connection queue for a database.
#[must_use]
pub fn connection_segment_name(database_name: &str) -> String {
    format!("/{database_name}")
}

/// Segment name of the wire belonging to one session.
#[must_use]
pub fn session_segment_name(database_name: &str, session_id: u64) -> String {
    format!("/{database_name}-{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_names() {
        assert_eq!(connection_segment_name("portico"), "/portico");
        assert_eq!(session_segment_name("portico", 17), "/portico-17");
    }
}
