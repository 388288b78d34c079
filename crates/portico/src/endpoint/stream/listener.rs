// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream listener.
//!
//! Accepts TCP connections and spawns one worker thread per session.
//! Session ids continue the monotonic space of this endpoint; connections
//! beyond the configured budget still get a worker, but a declining one
//! that answers the handshake with `RESOURCE_LIMIT_REACHED`.

use super::socket::StreamSocket;
use super::worker::StreamWorker;
use crate::api::DatabaseInfo;
use crate::endpoint::common::WorkerAttributes;
use crate::framework::RoutingService;
use crate::session::{SessionRegistry, ShutdownRequest};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

struct WorkerHandle {
    session_id: u64,
    worker: StreamWorker,
    thread: JoinHandle<()>,
}

/// The stream endpoint's listener loop.
pub struct StreamListener {
    listener: TcpListener,
    session_budget: usize,
    routing: Arc<RoutingService>,
    registry: Option<Arc<SessionRegistry>>,
    database_info: Arc<DatabaseInfo>,
    attrs: WorkerAttributes,
    session_counter: AtomicU64,
    terminating: AtomicBool,
    workers: Mutex<Vec<WorkerHandle>>,
    done_tx: Sender<u64>,
    done_rx: Receiver<u64>,
}

impl StreamListener {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Propagates bind/configuration failures.
    pub fn bind(
        port: u16,
        session_budget: usize,
        routing: Arc<RoutingService>,
        registry: Option<Arc<SessionRegistry>>,
        database_info: Arc<DatabaseInfo>,
        attrs: WorkerAttributes,
    ) -> std::io::Result<Self> {
        let address: std::net::SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&address.into())?;
        socket.listen(128)?;
        let listener: TcpListener = socket.into();

        // periodic accept timeouts let the loop observe termination
        listener.set_nonblocking(true)?;

        log::info!("stream endpoint listening on port {}", port);
        let (done_tx, done_rx) = unbounded();
        Ok(Self {
            listener,
            session_budget,
            routing,
            registry,
            database_info,
            attrs,
            session_counter: AtomicU64::new(0),
            terminating: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            done_tx,
            done_rx,
        })
    }

    /// Local port the listener bound to (for port 0 binds in tests).
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or_default()
    }

    /// The listener thread body: accept until termination, then drain.
    pub fn run(&self) {
        loop {
            if self.terminating.load(Ordering::Acquire) {
                break;
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.reap_finished();
                    log::debug!("stream connection from {peer}");
                    if let Err(e) = stream.set_nonblocking(false) {
                        log::error!("cannot configure session socket: {e}");
                        continue;
                    }
                    match StreamSocket::new(stream) {
                        Ok(socket) => self.spawn_worker(Arc::new(socket)),
                        Err(e) => log::error!("cannot wrap session socket: {e}"),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.reap_finished();
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    log::error!("stream accept failed: {e}");
                    break;
                }
            }
        }

        for handle in self.workers.lock().iter() {
            handle.worker.terminate(ShutdownRequest::Forceful);
        }
        for handle in self.workers.lock().drain(..) {
            log::debug!("waiting for session {}", handle.session_id);
            let _ = handle.thread.join();
        }
    }

    fn spawn_worker(&self, socket: Arc<StreamSocket>) {
        let session_id = self.session_counter.fetch_add(1, Ordering::AcqRel) + 1;
        let live = self.workers.lock().len();
        let decline = live >= self.session_budget;
        if decline {
            log::info!(
                "declining session {session_id}: {live} sessions already active"
            );
        }

        let worker = StreamWorker::new(
            session_id,
            socket,
            Arc::clone(&self.routing),
            Arc::clone(&self.database_info),
            self.registry.clone(),
            decline,
            self.attrs.clone(),
        );
        let thread = {
            let worker = worker.clone();
            let done = self.done_tx.clone();
            std::thread::Builder::new()
                .name(format!("stream-session-{session_id}"))
                .spawn(move || {
                    worker.run();
                    let _ = done.send(worker.session_id());
                })
        };
        match thread {
            Ok(thread) => self.workers.lock().push(WorkerHandle {
                session_id,
                worker,
                thread,
            }),
            Err(e) => log::error!("cannot spawn stream worker for {session_id}: {e}"),
        }
    }

    /// Join finished workers.
    fn reap_finished(&self) {
        while let Ok(session_id) = self.done_rx.try_recv() {
            let mut workers = self.workers.lock();
            if let Some(position) = workers.iter().position(|h| h.session_id == session_id) {
                let handle = workers.swap_remove(position);
                drop(workers);
                let _ = handle.thread.join();
            }
        }
    }

    /// Stop accepting and let the run loop drain.
    pub fn terminate(&self) {
        self.terminating.store(true, Ordering::Release);
    }
}
