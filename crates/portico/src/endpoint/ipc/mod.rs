// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared-memory IPC endpoint.
//!
//! Admission runs through a cross-process connection queue in the segment
//! `/<database_name>`; each accepted session gets its own wire segment
//! `/<database_name>-<session_id>` with a request ring, a response ring,
//! and a result-set garbage collection area.

mod connection_queue;
mod endpoint;
mod listener;
mod wire;
mod worker;

pub use connection_queue::{ConnectionContainer, ConnectionQueue, SlotTicket, REJECTED_SESSION};
pub use endpoint::IpcEndpoint;
pub use listener::IpcListener;
pub use wire::{FrameKind, ServerWire, WireClient, WireFrame};
pub use worker::IpcWorker;

use crate::shm::ShmError;
use thiserror::Error;

/// Errors of the IPC endpoint.
#[derive(Debug, Error)]
pub enum IpcError {
    /// All connection slots of the requested class are outstanding.
    #[error("resource limit reached: all {0} connection slots are in use")]
    ResourceLimit(usize),

    /// The connection queue is shutting down.
    #[error("connection queue is terminated")]
    Terminated,

    #[error(transparent)]
    Shm(#[from] ShmError),

    #[error("wire protocol violation: {0}")]
    Protocol(String),
}

/// Result type for IPC operations.
pub type Result<T> = std::result::Result<T, IpcError>;
