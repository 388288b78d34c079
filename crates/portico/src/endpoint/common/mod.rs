// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint-independent session machinery.
//!
//! The worker state machine, the request/response types endpoints hand to
//! services, and the control messages of the endpoint protocol.

mod message;
mod worker;

pub use message::{
    decode_request_payload, encode_request_payload, EndpointControl, EndpointReply,
};
pub use worker::{AwaitEvent, EndpointWorker, WireAdapter, WorkerAttributes};

use crate::api::{DatabaseInfo, Request, Response, SessionInfo};
use std::sync::Arc;
use thiserror::Error;

/// Worker-boundary failures. Logged at the outermost loop; never panics.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("wire failure: {0}")]
    Wire(String),

    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// A response as the worker sees it: the service-facing [`Response`]
/// surface plus completion tracking and the cooperative cancel flag.
pub trait EndpointResponse: Response {
    /// Whether the response is fully delivered: body or error sent and
    /// every acquired channel released.
    fn completed(&self) -> bool;

    /// Raise the cancel flag. Cooperative: handlers poll it.
    fn set_cancel(&self);

    /// Whether a cancel was requested for this response.
    fn cancel_requested(&self) -> bool;
}

/// One decoded request frame with the metadata the worker attaches.
pub struct EndpointRequest {
    session_id: u64,
    service_id: u64,
    payload: Vec<u8>,
    database_info: Arc<DatabaseInfo>,
    session_info: SessionInfo,
}

impl EndpointRequest {
    #[must_use]
    pub fn new(
        session_id: u64,
        service_id: u64,
        payload: Vec<u8>,
        database_info: Arc<DatabaseInfo>,
        session_info: SessionInfo,
    ) -> Self {
        Self {
            session_id,
            service_id,
            payload,
            database_info,
            session_info,
        }
    }
}

impl Request for EndpointRequest {
    fn session_id(&self) -> u64 {
        self.session_id
    }

    fn service_id(&self) -> u64 {
        self.service_id
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn database_info(&self) -> &DatabaseInfo {
        &self.database_info
    }

    fn session_info(&self) -> &SessionInfo {
        &self.session_info
    }
}
