// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IPC listener.
//!
//! Blocks on the connection queue, creates a session wire per accepted
//! request, and spawns one worker thread per session. Ownership is one
//! way: the listener holds worker handles and sends shutdown requests;
//! workers only report completion over a channel, carrying their session
//! id and admission slot so the slot returns to the pool.

use super::connection_queue::ConnectionContainer;
use super::wire::ServerWire;
use super::worker::IpcWorker;
use crate::api::DatabaseInfo;
use crate::endpoint::common::WorkerAttributes;
use crate::framework::RoutingService;
use crate::session::{SessionRegistry, ShutdownRequest};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

struct WorkerHandle {
    session_id: u64,
    worker: IpcWorker,
    thread: JoinHandle<()>,
}

/// The IPC endpoint's listener loop.
pub struct IpcListener {
    database_name: String,
    container: Arc<ConnectionContainer>,
    routing: Arc<RoutingService>,
    registry: Option<Arc<SessionRegistry>>,
    database_info: Arc<DatabaseInfo>,
    attrs: WorkerAttributes,
    workers: Mutex<Vec<WorkerHandle>>,
    done_tx: Sender<(u64, usize)>,
    done_rx: Receiver<(u64, usize)>,
}

impl IpcListener {
    #[must_use]
    pub fn new(
        database_name: String,
        container: Arc<ConnectionContainer>,
        routing: Arc<RoutingService>,
        registry: Option<Arc<SessionRegistry>>,
        database_info: Arc<DatabaseInfo>,
        attrs: WorkerAttributes,
    ) -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            database_name,
            container,
            routing,
            registry,
            database_info,
            attrs,
            workers: Mutex::new(Vec::new()),
            done_tx,
            done_rx,
        }
    }

    /// The listener thread body: accept until termination, then drain.
    pub fn run(&self) {
        let queue = self.container.connection_queue();
        loop {
            let Some(session_id) = queue.listen() else {
                log::debug!("ipc listener received terminate request");
                break;
            };
            let slot_index = queue.slot_index();
            log::debug!("connect request: session_id = {session_id}");

            self.reap_finished();

            let wire = match ServerWire::create(&self.database_name, session_id) {
                Ok(wire) => Arc::new(wire),
                Err(e) => {
                    log::error!("cannot create session wire for {session_id}: {e}");
                    queue.reject(slot_index);
                    continue;
                }
            };
            queue.accept(slot_index, session_id);

            let worker = IpcWorker::new(
                session_id,
                wire,
                Arc::clone(&self.routing),
                Arc::clone(&self.database_info),
                self.registry.clone(),
                self.attrs.clone(),
            );
            let thread = {
                let worker = worker.clone();
                let done = self.done_tx.clone();
                std::thread::Builder::new()
                    .name(format!("ipc-session-{session_id}"))
                    .spawn(move || {
                        worker.run();
                        let _ = done.send((worker.session_id(), slot_index));
                    })
            };
            match thread {
                Ok(thread) => self.workers.lock().push(WorkerHandle {
                    session_id,
                    worker,
                    thread,
                }),
                Err(e) => {
                    log::error!("cannot spawn ipc worker for {session_id}: {e}");
                    queue.release_slot(slot_index);
                }
            }
        }

        // cooperative drain: ask every live worker to stop, then join
        for handle in self.workers.lock().iter() {
            handle.worker.terminate(ShutdownRequest::Forceful);
        }
        for handle in self.workers.lock().drain(..) {
            log::debug!("waiting for session {}", handle.session_id);
            let _ = handle.thread.join();
        }
        while let Ok((_, slot_index)) = self.done_rx.try_recv() {
            queue.release_slot(slot_index);
        }
        queue.confirm_terminated();
    }

    /// Join finished workers and return their admission slots.
    fn reap_finished(&self) {
        let queue = self.container.connection_queue();
        while let Ok((session_id, slot_index)) = self.done_rx.try_recv() {
            queue.release_slot(slot_index);
            let mut workers = self.workers.lock();
            if let Some(position) = workers.iter().position(|h| h.session_id == session_id) {
                let handle = workers.swap_remove(position);
                drop(workers);
                let _ = handle.thread.join();
            }
        }
    }

    /// Stop accepting and wake the listener loop.
    pub fn terminate(&self) {
        self.container.connection_queue().request_terminate();
    }
}
