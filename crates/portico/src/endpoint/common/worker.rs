// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The per-session worker state machine.
//!
//! One worker drives one session from handshake to close, independent of
//! the transport behind it. Transports plug in through [`WireAdapter`].
//!
//! States: a session starts awaiting its handshake, then serves requests
//! until a shutdown completes. Request/response pairs are tracked per slot;
//! a sweep on every idle tick removes completed pairs. Graceful shutdown
//! waits for the tracking map to drain and for the transport to report no
//! incomplete result set; forceful shutdown answers `SESSION_CLOSED` on
//! every outstanding slot and closes at once.

use super::message::{
    decode_request_payload, EndpointControl, EndpointReply,
};
use super::{EndpointRequest, EndpointResponse, WorkerError};
use crate::api::{ConnectionKind, DatabaseInfo, Response, ResponseCode, SessionInfo};
use crate::diagnostics::{DiagnosticCode, DiagnosticRecord};
use crate::framework::{RoutingService, SERVICE_ID_ENDPOINT_BROKER, SERVICE_ID_ROUTING};
use crate::session::{
    SessionContext, SessionRegistry, SessionVariableSet, ShutdownRequest, VariableDeclaration,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One event from the session wire.
#[derive(Debug)]
pub enum AwaitEvent {
    /// A request frame: response slot plus raw frame payload.
    Payload { slot: u16, payload: Vec<u8> },
    /// Nothing arrived within the poll window.
    Timeout,
    /// The client announced session termination.
    TerminationRequest,
    /// The wire is broken.
    Error(String),
}

/// The transport surface a worker drives.
pub trait WireAdapter: Send + Sync + 'static {
    fn connection_kind(&self) -> ConnectionKind;

    fn connection_info(&self) -> String;

    /// Wait up to `timeout` for the next wire event.
    fn await_frame(&self, timeout: Duration) -> AwaitEvent;

    /// Response object bound to the given slot.
    fn response_for(&self, slot: u16) -> Arc<dyn EndpointResponse>;

    /// Bound the number of concurrently open result-set channels,
    /// negotiated by the handshake.
    fn change_slot_size(&self, max_result_sets: usize);

    /// Announce server-side session end.
    fn send_bye(&self);

    /// Acknowledge a client termination request.
    fn send_bye_ok(&self);

    /// Whether the transport still holds result-set data the client has
    /// not consumed. Always false for transports without retained buffers.
    fn has_incomplete_resultset(&self) -> bool;

    fn close(&self);
}

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerAttributes {
    /// Wire poll window; also the cadence of sweep/shutdown/expiration
    /// checks.
    pub poll_interval: Duration,
    /// Deadline for the first (handshake) frame. A client that connects
    /// and dies silently is cut off here.
    pub handshake_timeout: Duration,
    /// Variable declarations for new sessions.
    pub variable_declarations: Vec<VariableDeclaration>,
}

impl Default for WorkerAttributes {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(10),
            variable_declarations: Vec::new(),
        }
    }
}

type TrackedPair = (Arc<EndpointRequest>, Arc<dyn EndpointResponse>);

/// The session worker.
pub struct EndpointWorker<W: WireAdapter> {
    session_id: u64,
    wire: Arc<W>,
    routing: Arc<RoutingService>,
    database_info: Arc<DatabaseInfo>,
    registry: Option<Arc<SessionRegistry>>,
    decline: bool,
    attrs: WorkerAttributes,
    context: Mutex<Option<Arc<SessionContext>>>,
    reqres: Mutex<HashMap<u16, TrackedPair>>,
    shutdown_from_client: AtomicBool,
}

impl<W: WireAdapter> EndpointWorker<W> {
    #[must_use]
    pub fn new(
        session_id: u64,
        wire: Arc<W>,
        routing: Arc<RoutingService>,
        database_info: Arc<DatabaseInfo>,
        registry: Option<Arc<SessionRegistry>>,
        decline: bool,
        attrs: WorkerAttributes,
    ) -> Self {
        Self {
            session_id,
            wire,
            routing,
            database_info,
            registry,
            decline,
            attrs,
            context: Mutex::new(None),
            reqres: Mutex::new(HashMap::new()),
            shutdown_from_client: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Request shutdown from outside the worker thread (listener or
    /// administration).
    pub fn terminate(&self, kind: ShutdownRequest) -> bool {
        log::trace!("terminate requested: session_id = {}", self.session_id);
        match self.context.lock().as_ref() {
            Some(ctx) => ctx.request_shutdown(kind),
            None => false,
        }
    }

    /// Drive the session to completion. The single catch-all boundary of
    /// the worker thread: internal failures are logged, never propagated.
    pub fn run(&self) {
        log::trace!("session started: session_id = {}", self.session_id);
        if let Err(e) = self.do_work() {
            log::error!("session worker failed: session_id = {}: {e}", self.session_id);
        }
        self.notify_outstanding_closed();
        // drop the context so the registry entry expires with the worker
        self.context.lock().take();
        self.wire.close();
        log::trace!("session finished: session_id = {}", self.session_id);
    }

    fn do_work(&self) -> Result<(), WorkerError> {
        if self.handshake_phase()? {
            self.active_phase()?;
        }
        Ok(())
    }

    // ----- handshake -----------------------------------------------------

    fn handshake_phase(&self) -> Result<bool, WorkerError> {
        let deadline = Instant::now() + self.attrs.handshake_timeout;
        loop {
            match self.wire.await_frame(self.attrs.poll_interval) {
                AwaitEvent::Payload { slot, payload } => {
                    let res = self.wire.response_for(slot);
                    res.set_session_id(self.session_id);

                    if self.decline {
                        res.error(DiagnosticRecord::new(
                            DiagnosticCode::ResourceLimitReached,
                            "requests for session connections exceeded the maximum number of sessions",
                        ));
                        self.drain_one_frame("decline");
                        return Ok(false);
                    }

                    return match self.process_handshake(&payload, res.as_ref()) {
                        Ok(()) => Ok(true),
                        Err(e) => {
                            log::info!(
                                "handshake failed: session_id = {}: {e}",
                                self.session_id
                            );
                            res.error(DiagnosticRecord::new(
                                DiagnosticCode::IoError,
                                e.to_string(),
                            ));
                            self.drain_one_frame("handshake error");
                            Ok(false)
                        }
                    };
                }
                AwaitEvent::Timeout => {
                    if Instant::now() >= deadline {
                        log::info!(
                            "handshake timeout, closing: session_id = {}",
                            self.session_id
                        );
                        return Ok(false);
                    }
                }
                AwaitEvent::TerminationRequest => {
                    self.wire.send_bye_ok();
                    return Ok(false);
                }
                AwaitEvent::Error(e) => {
                    log::trace!(
                        "wire closed before handshake: session_id = {}: {e}",
                        self.session_id
                    );
                    return Ok(false);
                }
            }
        }
    }

    fn process_handshake(
        &self,
        frame_payload: &[u8],
        res: &dyn EndpointResponse,
    ) -> Result<(), WorkerError> {
        let Some((_service_id, body)) = decode_request_payload(frame_payload) else {
            return Err(WorkerError::Handshake("frame too short".into()));
        };
        let control: EndpointControl = serde_json::from_slice(body)
            .map_err(|e| WorkerError::Handshake(format!("first frame is no handshake: {e}")))?;
        let EndpointControl::Handshake {
            label,
            application_name,
            user_name,
            maximum_concurrent_result_sets,
        } = control
        else {
            return Err(WorkerError::Handshake(
                "first frame is no handshake message".into(),
            ));
        };

        let mut info = SessionInfo::new(
            self.session_id,
            self.wire.connection_kind(),
            self.wire.connection_info(),
        );
        info.label = label;
        info.application_name = application_name;
        info.user_name = user_name;

        let context = Arc::new(SessionContext::new(
            info,
            SessionVariableSet::new(self.attrs.variable_declarations.clone()),
        ));
        if let Some(registry) = &self.registry {
            if !registry.register(&context) {
                log::warn!(
                    "session {} is already registered",
                    self.session_id
                );
            }
        }
        *self.context.lock() = Some(context);

        self.wire.change_slot_size(maximum_concurrent_result_sets);

        res.set_code(ResponseCode::Success);
        let reply = serde_json::to_vec(&EndpointReply::HandshakeOk {
            session_id: self.session_id,
        })
        .map_err(|e| WorkerError::Handshake(e.to_string()))?;
        res.body(&reply)
            .map_err(|e| WorkerError::Wire(e.to_string()))?;
        Ok(())
    }

    /// The decline and handshake-error paths read one more frame before
    /// closing; existing clients may have sent a follow-up already.
    fn drain_one_frame(&self, reason: &str) {
        match self.wire.await_frame(self.attrs.poll_interval) {
            AwaitEvent::Payload { .. } => {
                // should not reach here
                log::info!(
                    "illegal procedure (frame received after {reason}): session_id = {}",
                    self.session_id
                );
            }
            _ => {
                log::trace!(
                    "session terminated after {reason}: session_id = {}",
                    self.session_id
                );
            }
        }
    }

    // ----- active phase --------------------------------------------------

    fn active_phase(&self) -> Result<(), WorkerError> {
        let mut expiration_notified = false;
        loop {
            match self.wire.await_frame(self.attrs.poll_interval) {
                AwaitEvent::Payload { slot, payload } => {
                    if !self.handle_payload(slot, &payload) {
                        break;
                    }
                }
                AwaitEvent::Timeout => {
                    self.care_reqreses();

                    if !expiration_notified && self.context_expired() {
                        log::info!(
                            "expiration time is over: session_id = {}",
                            self.session_id
                        );
                        self.request_shutdown(ShutdownRequest::Forceful);
                        expiration_notified = true;
                        continue;
                    }

                    match self.shutdown_request() {
                        ShutdownRequest::Forceful => {
                            self.notify_outstanding_closed();
                            break;
                        }
                        ShutdownRequest::Graceful => {
                            if self.is_completed() && !self.wire.has_incomplete_resultset() {
                                log::trace!(
                                    "completed shutdown request: session_id = {}",
                                    self.session_id
                                );
                                self.wire.send_bye();
                                break;
                            }
                        }
                        ShutdownRequest::Nothing => {}
                    }
                }
                AwaitEvent::TerminationRequest => {
                    if self.shutdown_from_client.swap(true, Ordering::AcqRel) {
                        self.wire.send_bye_ok();
                        break;
                    }
                    self.request_shutdown(ShutdownRequest::Forceful);
                    self.wire.send_bye_ok();
                }
                AwaitEvent::Error(e) => {
                    log::trace!("session wire error: session_id = {}: {e}", self.session_id);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Handle one request frame. False terminates the worker.
    fn handle_payload(&self, slot: u16, payload: &[u8]) -> bool {
        let Some((service_id, body)) = decode_request_payload(payload) else {
            log::warn!("malformed request frame: session_id = {}", self.session_id);
            let res = self.wire.response_for(slot);
            res.set_session_id(self.session_id);
            res.error(DiagnosticRecord::new(
                DiagnosticCode::IoError,
                "request frame lacks a service id",
            ));
            return true;
        };

        match service_id {
            SERVICE_ID_ENDPOINT_BROKER => self.endpoint_service(slot, body),
            SERVICE_ID_ROUTING => {
                let res = self.wire.response_for(slot);
                res.set_session_id(self.session_id);
                if self.routing_service_chain(body, res.as_ref()) {
                    self.care_reqreses();
                    return true;
                }
                self.forward(slot, service_id, body, res)
            }
            _ => {
                let res = self.wire.response_for(slot);
                res.set_session_id(self.session_id);
                if self.shutdown_request() != ShutdownRequest::Nothing {
                    res.error(DiagnosticRecord::new(
                        DiagnosticCode::SessionClosed,
                        "this session is already shutdown",
                    ));
                    return true;
                }
                self.forward(slot, service_id, body, res)
            }
        }
    }

    /// Endpoint-broker requests, handled inline. Currently cancel only.
    fn endpoint_service(&self, slot: u16, body: &[u8]) -> bool {
        match serde_json::from_slice::<EndpointControl>(body) {
            Ok(EndpointControl::Cancel) => {
                let tracked = self.reqres.lock().get(&slot).map(|(_, res)| Arc::clone(res));
                let record = DiagnosticRecord::new(
                    DiagnosticCode::OperationCancelled,
                    "the request on this slot was cancelled",
                );
                match tracked {
                    Some(res) => {
                        // cooperative: the running task keeps going and
                        // polls the flag; the slot is answered now
                        res.set_cancel();
                        res.error(record);
                    }
                    None => {
                        let res = self.wire.response_for(slot);
                        res.set_session_id(self.session_id);
                        res.error(record);
                    }
                }
                true
            }
            Ok(other) => {
                log::info!(
                    "unsupported endpoint operation {other:?}: session_id = {}",
                    self.session_id
                );
                let res = self.wire.response_for(slot);
                res.set_session_id(self.session_id);
                res.error(DiagnosticRecord::new(
                    DiagnosticCode::IoError,
                    "unsupported endpoint broker operation",
                ));
                true
            }
            Err(e) => {
                log::info!(
                    "terminate worker because endpoint service request is broken: {e}: session_id = {}",
                    self.session_id
                );
                false
            }
        }
    }

    /// Routing meta operations answered without dispatch. True when the
    /// request was consumed here.
    fn routing_service_chain(&self, body: &[u8], res: &dyn EndpointResponse) -> bool {
        let Ok(EndpointControl::UpdateExpirationTime { expiration_ms }) =
            serde_json::from_slice::<EndpointControl>(body)
        else {
            return false;
        };
        if let Some(ctx) = self.context.lock().as_ref() {
            ctx.update_expiration(
                expiration_ms.map(|ms| Instant::now() + Duration::from_millis(ms)),
            );
        }
        res.set_code(ResponseCode::Success);
        match serde_json::to_vec(&EndpointReply::Success) {
            Ok(reply) => {
                if let Err(e) = res.body(&reply) {
                    log::warn!("expiration reply failed: {e}");
                }
            }
            Err(e) => log::warn!("expiration reply encode failed: {e}"),
        }
        true
    }

    /// Register the pair and dispatch to the target service. False
    /// terminates the worker.
    fn forward(
        &self,
        slot: u16,
        service_id: u64,
        body: &[u8],
        res: Arc<dyn EndpointResponse>,
    ) -> bool {
        let request = Arc::new(EndpointRequest::new(
            self.session_id,
            service_id,
            body.to_vec(),
            Arc::clone(&self.database_info),
            self.session_info(),
        ));
        self.register_reqres(slot, Arc::clone(&request), Arc::clone(&res));

        match self
            .routing
            .dispatch(request, res as Arc<dyn Response>)
        {
            Ok(()) => true,
            Err(e) => {
                log::info!(
                    "terminate worker because service returned an error: {e}: session_id = {}",
                    self.session_id
                );
                false
            }
        }
    }

    // ----- request/response tracking -------------------------------------

    fn register_reqres(
        &self,
        slot: u16,
        request: Arc<EndpointRequest>,
        response: Arc<dyn EndpointResponse>,
    ) {
        if let Some((_, old)) = self.reqres.lock().insert(slot, (request, response)) {
            if !old.completed() {
                log::warn!(
                    "slot {slot} reused while still incomplete: session_id = {}",
                    self.session_id
                );
            }
        }
    }

    /// Sweep completed pairs out of the tracking map.
    fn care_reqreses(&self) {
        self.reqres.lock().retain(|_, (_, res)| !res.completed());
    }

    /// Whether no request is outstanding.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.reqres.lock().is_empty()
    }

    fn notify_outstanding_closed(&self) {
        let drained: Vec<TrackedPair> = {
            let mut map = self.reqres.lock();
            map.drain().map(|(_, pair)| pair).collect()
        };
        for (_, res) in drained {
            if !res.completed() {
                res.error(DiagnosticRecord::new(
                    DiagnosticCode::SessionClosed,
                    "this session is already shutdown",
                ));
            }
        }
    }

    // ----- session context helpers ---------------------------------------

    fn session_info(&self) -> SessionInfo {
        match self.context.lock().as_ref() {
            Some(ctx) => ctx.info().clone(),
            None => SessionInfo::new(
                self.session_id,
                self.wire.connection_kind(),
                self.wire.connection_info(),
            ),
        }
    }

    fn shutdown_request(&self) -> ShutdownRequest {
        self.context
            .lock()
            .as_ref()
            .map_or(ShutdownRequest::Nothing, |c| c.shutdown_request())
    }

    fn request_shutdown(&self, kind: ShutdownRequest) {
        if let Some(ctx) = self.context.lock().as_ref() {
            ctx.request_shutdown(kind);
        }
    }

    fn context_expired(&self) -> bool {
        self.context.lock().as_ref().map_or(false, |c| c.expired())
    }

    /// The session context, once the handshake created it.
    #[must_use]
    pub fn context(&self) -> Option<Arc<SessionContext>> {
        self.context.lock().clone()
    }
}
