// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Loopback endpoint.
//!
//! An in-process entry point for tests and debugging: a request goes
//! straight through the routing service on the calling thread, and the
//! whole response (code, head, body, released channel data) comes back
//! as one [`BufferedResponse`]. No wire, no worker thread; each call
//! blocks until the service finishes. Calls are not thread-safe with
//! respect to each other.

use crate::api::{
    ConnectionKind, DataChannel, DataWriter, DatabaseInfo, Response, ResponseCode, ResponseError,
    SessionInfo,
};
use crate::diagnostics::DiagnosticRecord;
use crate::endpoint::common::{EndpointRequest, EndpointResponse};
use crate::framework::{Component, Endpoint, Environment, FrameworkError, RoutingService};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// The fully buffered outcome of one loopback request.
#[derive(Debug, Clone, Default)]
pub struct BufferedResponse {
    session_id: u64,
    code: ResponseCode,
    diagnostic: Option<DiagnosticRecord>,
    body_head: Vec<u8>,
    body: Vec<u8>,
    channels: HashMap<String, Vec<Vec<u8>>>,
}

impl BufferedResponse {
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    #[must_use]
    pub fn code(&self) -> ResponseCode {
        self.code
    }

    /// Diagnostic record when the service reported an error.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&DiagnosticRecord> {
        self.diagnostic.as_ref()
    }

    #[must_use]
    pub fn body_head(&self) -> &[u8] {
        &self.body_head
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether a channel of that name was released.
    #[must_use]
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Committed chunks of a released channel, in delivery order.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<&[Vec<u8>]> {
        self.channels.get(name).map(Vec::as_slice)
    }
}

/// A channel buffering committed chunks in memory.
pub struct LoopbackDataChannel {
    name: String,
    committed: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl DataChannel for LoopbackDataChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn acquire(&self) -> crate::api::Result<Box<dyn DataWriter>> {
        Ok(Box::new(LoopbackDataWriter {
            committed: Arc::clone(&self.committed),
            staged: Vec::new(),
        }))
    }

    fn release(&self, writer: Box<dyn DataWriter>) -> crate::api::Result<()> {
        // uncommitted staged bytes die with the writer
        drop(writer);
        Ok(())
    }
}

struct LoopbackDataWriter {
    committed: Arc<Mutex<Vec<Vec<u8>>>>,
    staged: Vec<u8>,
}

impl DataWriter for LoopbackDataWriter {
    fn write(&mut self, data: &[u8]) -> crate::api::Result<()> {
        self.staged.extend_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> crate::api::Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        self.committed.lock().push(std::mem::take(&mut self.staged));
        Ok(())
    }
}

struct ChannelMaps {
    /// Channels currently acquired; removal and data publication happen
    /// atomically under the one lock.
    acquired: HashMap<String, Arc<LoopbackDataChannel>>,
    /// Data of released channels; a name acquired again appends.
    released: HashMap<String, Vec<Vec<u8>>>,
}

/// Response that buffers everything in memory.
pub struct LoopbackResponse {
    session_id: AtomicU64,
    code: Mutex<Option<ResponseCode>>,
    body_head: Mutex<Option<Vec<u8>>>,
    body: Mutex<Option<Vec<u8>>>,
    diagnostic: Mutex<Option<DiagnosticRecord>>,
    channels: RwLock<ChannelMaps>,
    cancel: AtomicBool,
}

impl LoopbackResponse {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: AtomicU64::new(0),
            code: Mutex::new(None),
            body_head: Mutex::new(None),
            body: Mutex::new(None),
            diagnostic: Mutex::new(None),
            channels: RwLock::new(ChannelMaps {
                acquired: HashMap::new(),
                released: HashMap::new(),
            }),
            cancel: AtomicBool::new(false),
        }
    }

    /// Drain into the flat result handed back to the caller.
    fn into_buffered(&self) -> BufferedResponse {
        let mut channels = self.channels.write();
        BufferedResponse {
            session_id: self.session_id.load(Ordering::Acquire),
            code: self.code.lock().unwrap_or_default(),
            diagnostic: self.diagnostic.lock().clone(),
            body_head: self.body_head.lock().clone().unwrap_or_default(),
            body: self.body.lock().clone().unwrap_or_default(),
            channels: std::mem::take(&mut channels.released),
        }
    }
}

impl Default for LoopbackResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl Response for LoopbackResponse {
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
        if self.body.lock().is_some() || self.diagnostic.lock().is_some() {
            log::warn!("diagnostic after response completion: {record}");
            return;
        }
        self.set_code(ResponseCode::ApplicationError);
        *self.diagnostic.lock() = Some(record);
    }

    fn body_head(&self, data: &[u8]) -> crate::api::Result<()> {
        if self.session_id.load(Ordering::Acquire) == 0 {
            return Err(ResponseError::SessionIdMissing);
        }
        if self.body.lock().is_some() {
            return Err(ResponseError::HeadAfterBody);
        }
        let mut head = self.body_head.lock();
        if head.is_some() {
            return Err(ResponseError::AlreadyAssigned("body head"));
        }
        *head = Some(data.to_vec());
        Ok(())
    }

    fn body(&self, data: &[u8]) -> crate::api::Result<()> {
        if self.session_id.load(Ordering::Acquire) == 0 {
            return Err(ResponseError::SessionIdMissing);
        }
        let mut body = self.body.lock();
        if body.is_some() {
            return Err(ResponseError::AlreadyAssigned("body"));
        }
        *body = Some(data.to_vec());
        Ok(())
    }

    fn acquire_channel(&self, name: &str) -> crate::api::Result<Arc<dyn DataChannel>> {
        let mut maps = self.channels.write();
        if maps.acquired.contains_key(name) {
            return Err(ResponseError::ChannelInUse(name.to_string()));
        }
        let channel = Arc::new(LoopbackDataChannel {
            name: name.to_string(),
            committed: Arc::new(Mutex::new(Vec::new())),
        });
        maps.acquired.insert(name.to_string(), Arc::clone(&channel));
        Ok(channel)
    }

    fn release_channel(&self, channel: Arc<dyn DataChannel>) -> crate::api::Result<()> {
        let mut maps = self.channels.write();
        let Some(released) = maps.acquired.remove(channel.name()) else {
            return Err(ResponseError::AlreadyReleased);
        };
        let chunks = std::mem::take(&mut *released.committed.lock());
        maps.released
            .entry(released.name.clone())
            .or_default()
            .extend(chunks);
        Ok(())
    }
}

impl EndpointResponse for LoopbackResponse {
    fn completed(&self) -> bool {
        (self.body.lock().is_some() || self.diagnostic.lock().is_some())
            && self.channels.read().acquired.is_empty()
    }

    fn set_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// The loopback endpoint component.
#[derive(Default)]
pub struct LoopbackEndpoint {
    routing: Mutex<Option<Arc<RoutingService>>>,
    database_info: Mutex<Option<Arc<DatabaseInfo>>>,
}

impl LoopbackEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Send one request through the routing service and collect the
    /// response.
    ///
    /// Blocking, and not thread-safe across concurrent calls.
    #[must_use]
    pub fn request(&self, session_id: u64, service_id: u64, payload: &[u8]) -> BufferedResponse {
        let Some(routing) = self.routing.lock().clone() else {
            log::error!("loopback endpoint used before setup");
            return BufferedResponse {
                code: ResponseCode::IoError,
                ..BufferedResponse::default()
            };
        };
        let database_info = self
            .database_info
            .lock()
            .clone()
            .unwrap_or_else(|| Arc::new(DatabaseInfo::new("portico")));

        let request = Arc::new(EndpointRequest::new(
            session_id,
            service_id,
            payload.to_vec(),
            database_info,
            SessionInfo::new(session_id, ConnectionKind::Loopback, "loopback:"),
        ));
        let response = Arc::new(LoopbackResponse::new());
        response.set_session_id(session_id);

        if let Err(e) = routing.dispatch(request, Arc::clone(&response) as Arc<dyn Response>) {
            log::warn!("loopback request failed: {e}");
            response.error(DiagnosticRecord::new(
                crate::diagnostics::DiagnosticCode::IoError,
                e.to_string(),
            ));
        }
        response.into_buffered()
    }
}

impl Component for LoopbackEndpoint {
    fn label(&self) -> &'static str {
        "loopback_endpoint"
    }

    fn setup(&self, env: &Environment) -> Result<(), FrameworkError> {
        let routing = env
            .service_repository()
            .find::<RoutingService>()
            .ok_or_else(|| {
                FrameworkError::Setup("loopback_endpoint", "routing service missing".into())
            })?;
        *self.routing.lock() = Some(routing);

        let database_name: String = env
            .configuration()
            .section("ipc_endpoint")
            .and_then(|s| s.get("database_name"))
            .unwrap_or_else(|| "portico".to_string());
        *self.database_info.lock() = Some(Arc::new(DatabaseInfo::new(database_name)));
        Ok(())
    }
}

impl Endpoint for LoopbackEndpoint {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticCode;

    #[test]
    fn body_requires_session_id() {
        let res = LoopbackResponse::new();
        assert!(matches!(
            res.body(b"data"),
            Err(ResponseError::SessionIdMissing)
        ));
        res.set_session_id(1);
        res.body(b"data").expect("body");
    }

    #[test]
    fn body_and_head_assign_at_most_once() {
        let res = LoopbackResponse::new();
        res.set_session_id(1);
        res.body_head(b"head").expect("head");
        assert!(matches!(
            res.body_head(b"again"),
            Err(ResponseError::AlreadyAssigned("body head"))
        ));
        res.body(b"body").expect("body");
        assert!(matches!(
            res.body(b"again"),
            Err(ResponseError::AlreadyAssigned("body"))
        ));
    }

    #[test]
    fn head_after_body_is_rejected() {
        let res = LoopbackResponse::new();
        res.set_session_id(1);
        res.body(b"body").expect("body");
        assert!(matches!(
            res.body_head(b"late head"),
            Err(ResponseError::HeadAfterBody)
        ));
    }

    #[test]
    fn channel_release_is_exactly_once() {
        let res = LoopbackResponse::new();
        res.set_session_id(1);
        let channel = res.acquire_channel("ch0").expect("acquire");
        assert!(matches!(
            res.acquire_channel("ch0"),
            Err(ResponseError::ChannelInUse(_))
        ));
        res.release_channel(Arc::clone(&channel)).expect("release");
        assert!(matches!(
            res.release_channel(channel),
            Err(ResponseError::AlreadyReleased)
        ));
    }

    #[test]
    fn writes_after_release_are_not_observable() {
        let res = LoopbackResponse::new();
        res.set_session_id(1);
        let channel = res.acquire_channel("ch0").expect("acquire");
        let mut writer = channel.acquire().expect("writer");
        writer.write(b"before").expect("write");
        writer.commit().expect("commit");
        res.release_channel(channel).expect("release");

        // commits after the release stay invisible
        writer.write(b"after").expect("write");
        writer.commit().expect("commit");

        let buffered = res.into_buffered();
        assert_eq!(
            buffered.channel("ch0"),
            Some(&[b"before".to_vec()][..])
        );
    }

    #[test]
    fn committed_chunks_keep_writer_order() {
        let res = LoopbackResponse::new();
        res.set_session_id(123);
        res.set_code(ResponseCode::Success);
        res.body_head(b"head").expect("head");

        for ch in 0..2 {
            let name = format!("ch{ch}");
            let channel = res.acquire_channel(&name).expect("acquire");
            for w in 0..2 {
                let mut writer = channel.acquire().expect("writer");
                for i in 0..2 {
                    let data = format!("ch{ch}-w{w}-{i}");
                    writer.write(data.as_bytes()).expect("write");
                    writer.commit().expect("commit");
                }
                channel.release(writer).expect("writer release");
            }
            res.release_channel(channel).expect("channel release");
        }
        res.body(b"payload").expect("body");

        let buffered = res.into_buffered();
        assert_eq!(buffered.session_id(), 123);
        assert_eq!(buffered.code(), ResponseCode::Success);
        assert_eq!(buffered.body_head(), b"head");
        assert_eq!(buffered.body(), b"payload");
        for ch in 0..2 {
            let name = format!("ch{ch}");
            let chunks = buffered.channel(&name).expect("channel data");
            let expected: Vec<Vec<u8>> = (0..2)
                .flat_map(|w| (0..2).map(move |i| format!("ch{ch}-w{w}-{i}").into_bytes()))
                .collect();
            assert_eq!(chunks, &expected[..]);
        }
    }

    #[test]
    fn error_sets_application_error() {
        let res = LoopbackResponse::new();
        res.set_session_id(9);
        res.error(DiagnosticRecord::new(
            DiagnosticCode::ServiceUnavailable,
            "nobody home",
        ));
        let buffered = res.into_buffered();
        assert_eq!(buffered.code(), ResponseCode::ApplicationError);
        assert_eq!(
            buffered.diagnostic().map(|d| d.code),
            Some(DiagnosticCode::ServiceUnavailable)
        );
    }

    #[test]
    fn unused_endpoint_reports_io_error() {
        let endpoint = LoopbackEndpoint::new();
        let response = endpoint.request(1, 2, b"");
        assert_eq!(response.code(), ResponseCode::IoError);
    }
}
