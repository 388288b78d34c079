// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IPC session worker: the shared state machine bound to a shared-memory
//! wire.

use super::wire::{FrameKind, ServerWire};
use crate::api::{
    ConnectionKind, DataChannel, DataWriter, DatabaseInfo, Response, ResponseCode, ResponseError,
};
use crate::diagnostics::DiagnosticRecord;
use crate::endpoint::common::{
    AwaitEvent, EndpointResponse, EndpointWorker, WireAdapter, WorkerAttributes,
};
use crate::framework::RoutingService;
use crate::session::{SessionRegistry, ShutdownRequest};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Transport adapter over a [`ServerWire`].
pub struct IpcWireAdapter {
    wire: Arc<ServerWire>,
    channel_limit: Arc<AtomicUsize>,
}

impl IpcWireAdapter {
    fn new(wire: Arc<ServerWire>) -> Self {
        Self {
            wire,
            channel_limit: Arc::new(AtomicUsize::new(1)),
        }
    }
}

impl WireAdapter for IpcWireAdapter {
    fn connection_kind(&self) -> ConnectionKind {
        ConnectionKind::Ipc
    }

    fn connection_info(&self) -> String {
        self.wire.name().to_string()
    }

    fn await_frame(&self, timeout: Duration) -> AwaitEvent {
        match self.wire.receive(timeout) {
            None => AwaitEvent::Timeout,
            Some(Ok(frame)) => match frame.kind {
                FrameKind::RequestPayload => AwaitEvent::Payload {
                    slot: frame.slot,
                    payload: frame.payload,
                },
                FrameKind::RequestBye => AwaitEvent::TerminationRequest,
                other => AwaitEvent::Error(format!("unexpected frame kind {other:?}")),
            },
            Some(Err(e)) => AwaitEvent::Error(e.to_string()),
        }
    }

    fn response_for(&self, slot: u16) -> Arc<dyn EndpointResponse> {
        Arc::new(IpcResponse::new(
            Arc::clone(&self.wire),
            slot,
            Arc::clone(&self.channel_limit),
        ))
    }

    fn change_slot_size(&self, max_result_sets: usize) {
        self.channel_limit
            .store(max_result_sets.max(1), Ordering::Release);
    }

    fn send_bye(&self) {
        if let Err(e) = self.wire.send(FrameKind::ResponseBye, 0, &[]) {
            log::trace!("session bye not delivered: {e}");
        }
    }

    fn send_bye_ok(&self) {
        if let Err(e) = self.wire.send(FrameKind::ResponseByeOk, 0, &[]) {
            log::trace!("session bye-ok not delivered: {e}");
        }
    }

    fn has_incomplete_resultset(&self) -> bool {
        !self.wire.gc_dump()
    }

    fn close(&self) {
        self.wire.close();
    }
}

/// Response writing onto the shared-memory wire.
pub struct IpcResponse {
    wire: Arc<ServerWire>,
    slot: u16,
    session_id: AtomicU64,
    code: Mutex<Option<ResponseCode>>,
    head_sent: AtomicBool,
    finished: AtomicBool,
    channel_limit: Arc<AtomicUsize>,
    channels: RwLock<HashMap<String, Arc<IpcDataChannel>>>,
    cancel: AtomicBool,
}

impl IpcResponse {
    fn new(wire: Arc<ServerWire>, slot: u16, channel_limit: Arc<AtomicUsize>) -> Self {
        Self {
            wire,
            slot,
            session_id: AtomicU64::new(0),
            code: Mutex::new(None),
            head_sent: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            channel_limit,
            channels: RwLock::new(HashMap::new()),
            cancel: AtomicBool::new(false),
        }
    }

    fn ensure_writable(&self) -> crate::api::Result<()> {
        if self.session_id.load(Ordering::Acquire) == 0 {
            return Err(ResponseError::SessionIdMissing);
        }
        if self.finished.load(Ordering::Acquire) {
            return Err(ResponseError::AlreadyAssigned("body"));
        }
        Ok(())
    }
}

impl Response for IpcResponse {
    fn set_session_id(&self, id: u64) {
        self.session_id.store(id, Ordering::Release);
    }

    fn set_code(&self, code: ResponseCode) {
        let mut slot = self.code.lock();
        if slot.is_some() {
            log::warn!("response code reassigned, keeping the first value");
            return;
        }
        *slot = Some(code);
    }

    fn error(&self, record: DiagnosticRecord) {
        if self.finished.swap(true, Ordering::AcqRel) {
            log::warn!("diagnostic after response completion: {record}");
            return;
        }
        self.set_code(ResponseCode::ApplicationError);
        let payload = serde_json::to_vec(&record).unwrap_or_default();
        if let Err(e) = self
            .wire
            .send(FrameKind::ResponseDiagnostic, self.slot, &payload)
        {
            log::warn!("diagnostic not delivered on slot {}: {e}", self.slot);
        }
    }

    fn body_head(&self, data: &[u8]) -> crate::api::Result<()> {
        self.ensure_writable()?;
        if self.head_sent.swap(true, Ordering::AcqRel) {
            return Err(ResponseError::AlreadyAssigned("body head"));
        }
        self.wire
            .send(FrameKind::ResponseBodyHead, self.slot, data)
            .map_err(|e| ResponseError::Wire(e.to_string()))
    }

    fn body(&self, data: &[u8]) -> crate::api::Result<()> {
        self.ensure_writable()?;
        self.wire
            .send(FrameKind::ResponseBody, self.slot, data)
            .map_err(|e| ResponseError::Wire(e.to_string()))?;
        self.finished.store(true, Ordering::Release);
        Ok(())
    }

    fn acquire_channel(&self, name: &str) -> crate::api::Result<Arc<dyn DataChannel>> {
        let limit = self.channel_limit.load(Ordering::Acquire);
        let mut channels = self.channels.write();
        if channels.contains_key(name) {
            return Err(ResponseError::ChannelInUse(name.to_string()));
        }
        if channels.len() >= limit {
            return Err(ResponseError::ChannelLimit(limit));
        }
        let channel = Arc::new(IpcDataChannel {
            wire: Arc::clone(&self.wire),
            slot: self.slot,
            name: name.to_string(),
        });
        channels.insert(name.to_string(), Arc::clone(&channel));
        Ok(channel)
    }

    fn release_channel(&self, channel: Arc<dyn DataChannel>) -> crate::api::Result<()> {
        match self.channels.write().remove(channel.name()) {
            Some(_) => Ok(()),
            None => Err(ResponseError::AlreadyReleased),
        }
    }
}

impl EndpointResponse for IpcResponse {
    fn completed(&self) -> bool {
        self.finished.load(Ordering::Acquire) && self.channels.read().is_empty()
    }

    fn set_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// A named result-set channel on the shared-memory wire.
pub struct IpcDataChannel {
    wire: Arc<ServerWire>,
    slot: u16,
    name: String,
}

impl DataChannel for IpcDataChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn acquire(&self) -> crate::api::Result<Box<dyn DataWriter>> {
        Ok(Box::new(IpcDataWriter {
            wire: Arc::clone(&self.wire),
            slot: self.slot,
            name: self.name.clone(),
            staged: Vec::new(),
        }))
    }

    fn release(&self, writer: Box<dyn DataWriter>) -> crate::api::Result<()> {
        // uncommitted staged bytes die with the writer
        drop(writer);
        Ok(())
    }
}

struct IpcDataWriter {
    wire: Arc<ServerWire>,
    slot: u16,
    name: String,
    staged: Vec<u8>,
}

impl DataWriter for IpcDataWriter {
    fn write(&mut self, data: &[u8]) -> crate::api::Result<()> {
        self.staged.extend_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> crate::api::Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        // chunk payload: length-prefixed channel name, then the data
        let mut payload = Vec::with_capacity(1 + self.name.len() + self.staged.len());
        payload.push(self.name.len() as u8);
        payload.extend_from_slice(self.name.as_bytes());
        payload.extend_from_slice(&self.staged);

        self.wire
            .send(FrameKind::ResponseChannelData, self.slot, &payload)
            .map_err(|e| ResponseError::Wire(e.to_string()))?;
        self.wire.gc_register_chunk();
        self.staged.clear();
        Ok(())
    }
}

/// One IPC session worker.
pub struct IpcWorker {
    inner: Arc<EndpointWorker<IpcWireAdapter>>,
}

impl IpcWorker {
    #[must_use]
    pub fn new(
        session_id: u64,
        wire: Arc<ServerWire>,
        routing: Arc<RoutingService>,
        database_info: Arc<DatabaseInfo>,
        registry: Option<Arc<SessionRegistry>>,
        attrs: WorkerAttributes,
    ) -> Self {
        Self {
            inner: Arc::new(EndpointWorker::new(
                session_id,
                Arc::new(IpcWireAdapter::new(wire)),
                routing,
                database_info,
                registry,
                false,
                attrs,
            )),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.inner.session_id()
    }

    /// Drive the session to completion; the body of the worker thread.
    pub fn run(&self) {
        self.inner.run();
    }

    /// Request shutdown from the listener or administration.
    pub fn terminate(&self, kind: ShutdownRequest) -> bool {
        self.inner.terminate(kind)
    }
}

impl Clone for IpcWorker {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
