// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Admission control over the shared-memory connection queue.

use portico::endpoint::ipc::{ConnectionContainer, IpcError, REJECTED_SESSION};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const THREADS: usize = 104;
const ADMIN_SESSIONS: usize = 1;

fn unique_db(tag: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("portico_cq_it_{tag}_{ts}")
}

struct Listener {
    container: Arc<ConnectionContainer>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Listener {
    fn start(container: Arc<ConnectionContainer>, reject: bool) -> Self {
        let reject = Arc::new(AtomicBool::new(reject));
        let thread = {
            let container = Arc::clone(&container);
            let reject = Arc::clone(&reject);
            thread::spawn(move || {
                let queue = container.connection_queue();
                while let Some(session_id) = queue.listen() {
                    let index = queue.slot_index();
                    if reject.load(Ordering::Acquire) {
                        queue.reject(index);
                    } else {
                        queue.accept(index, session_id);
                    }
                }
                queue.confirm_terminated();
            })
        };
        Self {
            container,
            thread: Some(thread),
        }
    }

    fn connect(&self) -> Result<u64, IpcError> {
        let queue = self.container.connection_queue();
        let ticket = queue.request()?;
        Ok(queue.wait(ticket))
    }

    fn connect_admin(&self) -> Result<u64, IpcError> {
        let queue = self.container.connection_queue();
        let ticket = queue.request_admin()?;
        Ok(queue.wait(ticket))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.container.connection_queue().request_terminate();
        if let Some(thread) = self.thread.take() {
            thread.join().expect("listener thread");
        }
    }
}

#[test]
fn normal_session_limit() {
    let db = unique_db("limit");
    let container =
        Arc::new(ConnectionContainer::create(&db, THREADS, ADMIN_SESSIONS).expect("create"));
    let listener = Listener::start(Arc::clone(&container), false);

    let mut session_ids = Vec::new();
    for _ in 0..THREADS {
        session_ids.push(listener.connect().expect("session granted"));
    }

    // every id issued exactly once, monotonic, never zero
    assert_eq!(session_ids.len(), THREADS);
    assert!(session_ids.iter().all(|id| *id != 0));
    for pair in session_ids.windows(2) {
        assert!(pair[0] < pair[1]);
    }

    assert!(matches!(
        listener.connect(),
        Err(IpcError::ResourceLimit(_))
    ));
}

#[test]
fn admin_session_reservation() {
    let db = unique_db("admin");
    let container =
        Arc::new(ConnectionContainer::create(&db, THREADS, ADMIN_SESSIONS).expect("create"));
    let listener = Listener::start(Arc::clone(&container), false);

    let mut session_ids = Vec::new();
    for _ in 0..THREADS {
        session_ids.push(listener.connect().expect("session granted"));
    }

    // the admin reservation still has room after all N ordinary slots
    session_ids.push(listener.connect_admin().expect("admin session granted"));

    assert!(matches!(
        listener.connect(),
        Err(IpcError::ResourceLimit(_))
    ));
    assert!(matches!(
        listener.connect_admin(),
        Err(IpcError::ResourceLimit(_))
    ));

    let unique: std::collections::HashSet<u64> = session_ids.iter().copied().collect();
    assert_eq!(unique.len(), session_ids.len());
}

#[test]
fn reject_mode_returns_sentinel() {
    let db = unique_db("reject");
    let container =
        Arc::new(ConnectionContainer::create(&db, THREADS, ADMIN_SESSIONS).expect("create"));
    let listener = Listener::start(Arc::clone(&container), true);

    assert_eq!(listener.connect().expect("request accepted"), REJECTED_SESSION);
    assert_eq!(
        listener.connect_admin().expect("request accepted"),
        REJECTED_SESSION
    );
}
