// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session lifecycle state.
//!
//! A session context is created when a connection is accepted, registered
//! in the [`SessionRegistry`], and owned by the endpoint worker driving the
//! connection. The registry only holds weak references: when the worker
//! drops the context, the session vanishes from every listing without an
//! explicit deregistration step.

mod context;
mod registry;
pub mod service;
mod variable;

pub use context::SessionContext;
pub use registry::SessionRegistry;
pub use variable::{SessionVariableSet, VariableDeclaration, VariableType, VariableValue};

use thiserror::Error;

/// Kind of shutdown requested for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ShutdownRequest {
    /// No shutdown requested.
    Nothing,
    /// Finish outstanding requests, then close.
    Graceful,
    /// Close immediately; outstanding requests observe `SESSION_CLOSED`.
    Forceful,
}

/// Errors from session administration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no session matches {0:?}")]
    NotFound(String),

    #[error("session specifier {0:?} matches more than one session")]
    Ambiguous(String),

    #[error("session is already terminating")]
    AlreadyTerminated,

    #[error("session variable {0:?} is not declared")]
    VariableNotDeclared(String),

    #[error("invalid value for session variable {0:?}")]
    VariableInvalidValue(String),
}

/// Result type for session administration.
pub type Result<T> = std::result::Result<T, SessionError>;
