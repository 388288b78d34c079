// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client-visible diagnostic codes.
//!
//! Every failure a service or endpoint reports to a client is carried as a
//! [`DiagnosticRecord`]. The code set is part of the client protocol; new
//! variants may be appended but existing names never change meaning.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticCode {
    Unknown,
    /// Connection declined by admission control.
    ResourceLimitReached,
    /// Request arrived on a session after shutdown was requested.
    SessionClosed,
    SessionNotFound,
    SessionAmbiguous,
    SessionAlreadyTerminated,
    SessionVariableNotDeclared,
    SessionVariableInvalidValue,
    /// No service registered under the requested id.
    ServiceUnavailable,
    /// Cooperative cancel acknowledged.
    OperationCancelled,
    /// Wire-level failure.
    IoError,
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::ResourceLimitReached => "RESOURCE_LIMIT_REACHED",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionAmbiguous => "SESSION_AMBIGUOUS",
            Self::SessionAlreadyTerminated => "SESSION_ALREADY_TERMINATED",
            Self::SessionVariableNotDeclared => "SESSION_VARIABLE_NOT_DECLARED",
            Self::SessionVariableInvalidValue => "SESSION_VARIABLE_INVALID_VALUE",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::OperationCancelled => "OPERATION_CANCELLED",
            Self::IoError => "IO_ERROR",
        };
        f.write_str(name)
    }
}

/// A diagnostic code with its human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub code: DiagnosticCode,
    pub message: String,
}

impl DiagnosticRecord {
    #[must_use]
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
