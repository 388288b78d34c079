// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process index of live sessions.
//!
//! The registry never owns a session: entries are `Weak` references to
//! contexts owned by their endpoint workers. Dead entries are pruned
//! lazily whenever the table is traversed, so dropping the last `Arc`
//! makes the session disappear from [`SessionRegistry::list`] without any
//! deregistration call.

use super::{Result, SessionContext, SessionError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Registry of live sessions, keyed by numeric id.
#[derive(Default)]
pub struct SessionRegistry {
    // Single mutex by design; traversals snapshot the weak refs and
    // upgrade outside the lock.
    entries: Mutex<HashMap<u64, Weak<SessionContext>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session context.
    ///
    /// Returns false when a live session with the same numeric id already
    /// exists. Symbolic ids may duplicate.
    pub fn register(&self, context: &Arc<SessionContext>) -> bool {
        let id = context.numeric_id();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&id) {
            if existing.strong_count() > 0 {
                return false;
            }
        }
        entries.insert(id, Arc::downgrade(context));
        true
    }

    /// Snapshot of all live sessions. Expired entries are removed.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<SessionContext>> {
        let snapshot: Vec<(u64, Weak<SessionContext>)> = {
            let entries = self.entries.lock();
            entries.iter().map(|(id, w)| (*id, w.clone())).collect()
        };

        let mut live = Vec::with_capacity(snapshot.len());
        let mut dead = Vec::new();
        for (id, weak) in snapshot {
            match weak.upgrade() {
                Some(ctx) => live.push(ctx),
                None => dead.push(id),
            }
        }
        if !dead.is_empty() {
            let mut entries = self.entries.lock();
            for id in dead {
                // ids are never reused, so the entry cannot have been
                // replaced since the snapshot
                entries.remove(&id);
            }
        }
        live.sort_by_key(|c| c.numeric_id());
        live
    }

    /// Resolve a session specifier to exactly one live session.
    ///
    /// A specifier is `:<numeric_id>` or a symbolic id. Symbolic lookups
    /// matching no session fail with `NotFound`, more than one with
    /// `Ambiguous`.
    pub fn find(&self, specifier: &str) -> Result<Arc<SessionContext>> {
        if let Some(numeric) = specifier.strip_prefix(':') {
            let id: u64 = numeric
                .parse()
                .map_err(|_| SessionError::NotFound(specifier.to_string()))?;
            return self
                .list()
                .into_iter()
                .find(|c| c.numeric_id() == id)
                .ok_or_else(|| SessionError::NotFound(specifier.to_string()));
        }

        let matches: Vec<_> = self
            .list()
            .into_iter()
            .filter(|c| !c.symbolic_id().is_empty() && c.symbolic_id() == specifier)
            .collect();
        match matches.len() {
            0 => Err(SessionError::NotFound(specifier.to_string())),
            1 => Ok(matches.into_iter().next().expect("one element")),
            _ => Err(SessionError::Ambiguous(specifier.to_string())),
        }
    }
}

impl crate::framework::Component for SessionRegistry {
    fn label(&self) -> &'static str {
        "session_resource"
    }
}

impl crate::framework::Resource for SessionRegistry {
    fn id(&self) -> crate::framework::ComponentId {
        crate::framework::RESOURCE_ID_SESSION
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ConnectionKind, SessionInfo};
    use crate::session::SessionVariableSet;

    fn context(id: u64, label: &str) -> Arc<SessionContext> {
        let mut info = SessionInfo::new(id, ConnectionKind::Ipc, "ipc:test");
        info.label = label.to_string();
        Arc::new(SessionContext::new(info, SessionVariableSet::default()))
    }

    #[test]
    fn register_rejects_duplicate_numeric_id() {
        let registry = SessionRegistry::new();
        let a = context(7, "a");
        let b = context(7, "b");
        assert!(registry.register(&a));
        assert!(!registry.register(&b));
    }

    #[test]
    fn dropping_owner_removes_from_list() {
        let registry = SessionRegistry::new();
        let ctx = context(1, "");
        assert!(registry.register(&ctx));
        assert_eq!(registry.list().len(), 1);

        drop(ctx);
        assert_eq!(registry.list().len(), 0);
    }

    #[test]
    fn find_by_numeric_specifier() {
        let registry = SessionRegistry::new();
        let ctx = context(42, "");
        registry.register(&ctx);

        let found = registry.find(":42").expect("session");
        assert_eq!(found.numeric_id(), 42);
        assert_eq!(
            registry.find(":43").unwrap_err(),
            SessionError::NotFound(":43".into())
        );
    }

    #[test]
    fn find_by_symbolic_id() {
        let registry = SessionRegistry::new();
        let a = context(1, "batch");
        registry.register(&a);

        assert_eq!(registry.find("batch").expect("session").numeric_id(), 1);
        assert_eq!(
            registry.find("interactive").unwrap_err(),
            SessionError::NotFound("interactive".into())
        );
    }

    #[test]
    fn ambiguous_symbolic_id_fails() {
        let registry = SessionRegistry::new();
        let a = context(1, "batch");
        let b = context(2, "batch");
        registry.register(&a);
        registry.register(&b);

        assert_eq!(
            registry.find("batch").unwrap_err(),
            SessionError::Ambiguous("batch".into())
        );
    }

    #[test]
    fn dead_entry_id_can_be_reregistered() {
        let registry = SessionRegistry::new();
        let a = context(5, "");
        registry.register(&a);
        drop(a);

        // The id itself is never handed out twice by admission, but a
        // stale weak entry must not block registration.
        let b = context(5, "");
        assert!(registry.register(&b));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn list_is_sorted_by_id() {
        let registry = SessionRegistry::new();
        let c = context(3, "");
        let a = context(1, "");
        let b = context(2, "");
        registry.register(&c);
        registry.register(&a);
        registry.register(&b);

        let ids: Vec<u64> = registry.list().iter().map(|c| c.numeric_id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
