// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP stream endpoint.
//!
//! Frames carry a 1-byte type, a 2-byte slot, and a big-endian
//! length-prefixed payload. One listener accepts connections; each session
//! runs the shared worker state machine over a [`StreamSocket`]. Sessions
//! beyond the configured budget are declined after their handshake.

mod client;
mod endpoint;
mod listener;
mod socket;
mod worker;

pub use client::StreamClient;
pub use endpoint::StreamEndpoint;
pub use listener::StreamListener;
pub use socket::{FrameType, StreamFrame, StreamSocket, MAX_FRAME_SIZE};
pub use worker::StreamWorker;

use thiserror::Error;

/// Errors of the stream endpoint.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("frame protocol violation: {0}")]
    Protocol(String),
}

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;
