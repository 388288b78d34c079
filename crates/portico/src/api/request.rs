// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server-side view of one client request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Transport a session arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionKind {
    Ipc,
    Stream,
    Loopback,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipc => f.write_str("ipc"),
            Self::Stream => f.write_str("stream"),
            Self::Loopback => f.write_str("loopback"),
        }
    }
}

/// Identity of the database instance serving the request.
#[derive(Debug, Clone)]
pub struct DatabaseInfo {
    pub name: String,
    pub process_id: u32,
    pub start_at: SystemTime,
}

impl DatabaseInfo {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            process_id: std::process::id(),
            start_at: SystemTime::now(),
        }
    }
}

/// Identity of the session a request belongs to.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: u64,
    pub label: String,
    pub application_name: String,
    pub user_name: String,
    pub connection_kind: ConnectionKind,
    pub connection_info: String,
    pub start_at: SystemTime,
}

impl SessionInfo {
    #[must_use]
    pub fn new(id: u64, connection_kind: ConnectionKind, connection_info: impl Into<String>) -> Self {
        Self {
            id,
            label: String::new(),
            application_name: String::new(),
            user_name: String::new(),
            connection_kind,
            connection_info: connection_info.into(),
            start_at: SystemTime::now(),
        }
    }
}

/// One decoded request frame, as seen by a service.
///
/// The payload is opaque; the target service id and the owning session id
/// were parsed out of the frame by the endpoint worker, which also attaches
/// the database and session metadata.
pub trait Request: Send + Sync {
    /// Numeric id of the owning session.
    fn session_id(&self) -> u64;

    /// Id of the service this request is addressed to.
    fn service_id(&self) -> u64;

    /// Raw payload bytes.
    fn payload(&self) -> &[u8];

    fn database_info(&self) -> &DatabaseInfo;

    fn session_info(&self) -> &SessionInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_kind_display() {
        assert_eq!(ConnectionKind::Ipc.to_string(), "ipc");
        assert_eq!(ConnectionKind::Stream.to_string(), "stream");
        assert_eq!(ConnectionKind::Loopback.to_string(), "loopback");
    }

    #[test]
    fn database_info_captures_process() {
        let info = DatabaseInfo::new("portico");
        assert_eq!(info.name, "portico");
        assert_eq!(info.process_id, std::process::id());
    }
}
