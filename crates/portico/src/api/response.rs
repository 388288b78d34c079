// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server-side response contract.
//!
//! A response carries a code, an optional head (short metadata sent before
//! the body), a body, and any number of named data channels. Assignment
//! rules, enforced by every implementation:
//!
//! - the session id is set before head or body
//! - the head, when present, is sent before the body
//! - code, head, and body are each assigned at most once
//! - a channel is released exactly once; writes after release are not
//!   observable by the client
//!
//! Code/head/body setters are not thread-safe; the caller serializes.
//! Channel acquire/release may be invoked from multiple threads.

use crate::diagnostics::DiagnosticRecord;
use std::sync::Arc;
use thiserror::Error;

/// Outcome class of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseCode {
    #[default]
    Success,
    ApplicationError,
    IoError,
}

/// Errors raised by response and channel operations.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("{0} was already assigned")]
    AlreadyAssigned(&'static str),

    #[error("session id must be assigned before head or body")]
    SessionIdMissing,

    #[error("body head must precede body")]
    HeadAfterBody,

    #[error("data channel {0:?} is already acquired")]
    ChannelInUse(String),

    #[error("data channel was already released")]
    AlreadyReleased,

    #[error("result set limit of {0} concurrent channels reached")]
    ChannelLimit(usize),

    #[error("wire failure: {0}")]
    Wire(String),
}

/// Result type for response operations.
pub type Result<T> = std::result::Result<T, ResponseError>;

/// A writer feeding one data channel.
///
/// Bytes passed to [`DataWriter::write`] become visible to the client only
/// on [`DataWriter::commit`], in commit order. Ordering across different
/// writers of the same channel is unspecified.
pub trait DataWriter: Send {
    /// Stage bytes for the next commit.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Publish everything staged since the previous commit as one chunk.
    fn commit(&mut self) -> Result<()>;
}

/// A named, ordered collection of chunks produced by its writers.
pub trait DataChannel: Send + Sync {
    /// Name the channel was acquired under.
    fn name(&self) -> &str;

    /// Obtain a new writer. Multiple writers may coexist.
    fn acquire(&self) -> Result<Box<dyn DataWriter>>;

    /// Return a writer, publishing its committed chunks. Uncommitted staged
    /// bytes are discarded.
    fn release(&self, writer: Box<dyn DataWriter>) -> Result<()>;
}

/// One response under construction.
pub trait Response: Send + Sync {
    /// Record the owning session. Must happen before head or body.
    fn set_session_id(&self, id: u64);

    /// Assign the response code.
    fn set_code(&self, code: ResponseCode);

    /// Report an error with diagnostics; no head or body may follow.
    fn error(&self, record: DiagnosticRecord);

    /// Send the response head.
    fn body_head(&self, data: &[u8]) -> Result<()>;

    /// Send the response body.
    fn body(&self, data: &[u8]) -> Result<()>;

    /// Open (or fail on duplicate) the named data channel.
    fn acquire_channel(&self, name: &str) -> Result<Arc<dyn DataChannel>>;

    /// Release a channel acquired from this response. All of the channel's
    /// writers are released implicitly.
    fn release_channel(&self, channel: Arc<dyn DataChannel>) -> Result<()>;
}
