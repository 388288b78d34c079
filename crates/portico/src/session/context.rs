// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-session context.

use super::{SessionVariableSet, ShutdownRequest};
use crate::api::SessionInfo;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

const SHUTDOWN_NOTHING: u8 = 0;
const SHUTDOWN_GRACEFUL: u8 = 1;
const SHUTDOWN_FORCEFUL: u8 = 2;

/// The state of one client session.
///
/// Owned by the endpoint worker; the registry and administration services
/// reach it through `Weak` references. Everything mutable is interior so
/// the context can be shared as `Arc<SessionContext>`.
pub struct SessionContext {
    info: SessionInfo,
    variables: Mutex<SessionVariableSet>,
    shutdown: AtomicU8,
    expiration: Mutex<Option<Instant>>,
}

impl SessionContext {
    #[must_use]
    pub fn new(info: SessionInfo, variables: SessionVariableSet) -> Self {
        Self {
            info,
            variables: Mutex::new(variables),
            shutdown: AtomicU8::new(SHUTDOWN_NOTHING),
            expiration: Mutex::new(None),
        }
    }

    /// Unique numeric id, assigned by the connection admission.
    #[must_use]
    pub fn numeric_id(&self) -> u64 {
        self.info.id
    }

    /// Symbolic id: the connection label. Not unique; may be empty.
    #[must_use]
    pub fn symbolic_id(&self) -> &str {
        &self.info.label
    }

    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Access the variable set under its lock.
    pub fn with_variables<R>(&self, f: impl FnOnce(&mut SessionVariableSet) -> R) -> R {
        f(&mut self.variables.lock())
    }

    /// Currently requested shutdown kind.
    #[must_use]
    pub fn shutdown_request(&self) -> ShutdownRequest {
        match self.shutdown.load(Ordering::Acquire) {
            SHUTDOWN_GRACEFUL => ShutdownRequest::Graceful,
            SHUTDOWN_FORCEFUL => ShutdownRequest::Forceful,
            _ => ShutdownRequest::Nothing,
        }
    }

    /// Request a shutdown.
    ///
    /// A forceful request overrides a graceful one; a graceful request
    /// neither downgrades an existing forceful request nor fails.
    /// Returns false only when asked for nothing while something stronger
    /// stands.
    pub fn request_shutdown(&self, kind: ShutdownRequest) -> bool {
        let wanted = match kind {
            ShutdownRequest::Nothing => return self.shutdown_request() == ShutdownRequest::Nothing,
            ShutdownRequest::Graceful => SHUTDOWN_GRACEFUL,
            ShutdownRequest::Forceful => SHUTDOWN_FORCEFUL,
        };
        self.shutdown.fetch_max(wanted, Ordering::AcqRel);
        true
    }

    /// Move the expiration point, clearing it when `None`.
    pub fn update_expiration(&self, at: Option<Instant>) {
        *self.expiration.lock() = at;
    }

    /// Whether the configured lifetime has elapsed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.expiration
            .lock()
            .map_or(false, |at| Instant::now() >= at)
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("numeric_id", &self.numeric_id())
            .field("symbolic_id", &self.symbolic_id())
            .field("connection", &self.info.connection_kind)
            .field("shutdown", &self.shutdown_request())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ConnectionKind;
    use std::time::Duration;

    fn context(id: u64) -> SessionContext {
        SessionContext::new(
            SessionInfo::new(id, ConnectionKind::Loopback, "loopback:"),
            SessionVariableSet::default(),
        )
    }

    #[test]
    fn shutdown_escalates_but_never_downgrades() {
        let ctx = context(1);
        assert_eq!(ctx.shutdown_request(), ShutdownRequest::Nothing);

        assert!(ctx.request_shutdown(ShutdownRequest::Graceful));
        assert_eq!(ctx.shutdown_request(), ShutdownRequest::Graceful);

        assert!(ctx.request_shutdown(ShutdownRequest::Forceful));
        assert_eq!(ctx.shutdown_request(), ShutdownRequest::Forceful);

        // a later graceful request does not weaken the forceful one
        assert!(ctx.request_shutdown(ShutdownRequest::Graceful));
        assert_eq!(ctx.shutdown_request(), ShutdownRequest::Forceful);
    }

    #[test]
    fn expiration_fires_after_deadline() {
        let ctx = context(2);
        assert!(!ctx.expired());

        ctx.update_expiration(Some(Instant::now() - Duration::from_millis(1)));
        assert!(ctx.expired());

        ctx.update_expiration(Some(Instant::now() + Duration::from_secs(60)));
        assert!(!ctx.expired());

        ctx.update_expiration(None);
        assert!(!ctx.expired());
    }
}
