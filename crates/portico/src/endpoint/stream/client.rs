// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal stream client.
//!
//! Speaks the session protocol from the client side: handshake, request
//! frames, response collection, session bye. Used by integration tests
//! and diagnostic tooling.

use super::socket::{FrameType, StreamFrame, StreamSocket};
use super::{Result, StreamError};
use crate::endpoint::common::{encode_request_payload, EndpointControl, EndpointReply};
use crate::framework::SERVICE_ID_ENDPOINT_BROKER;
use std::net::TcpStream;
use std::time::Duration;

/// A connected stream client.
pub struct StreamClient {
    socket: StreamSocket,
    session_id: Option<u64>,
}

impl StreamClient {
    /// Connect to a stream endpoint.
    ///
    /// # Errors
    ///
    /// Propagates connection failures.
    pub fn connect(port: u16) -> Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port))?;
        Ok(Self {
            socket: StreamSocket::new(stream)?,
            session_id: None,
        })
    }

    /// Run the handshake, returning the assigned session id.
    ///
    /// # Errors
    ///
    /// `StreamError::Protocol` when the server declines or answers with a
    /// diagnostic instead.
    pub fn handshake(
        &mut self,
        label: &str,
        application_name: &str,
        user_name: &str,
        maximum_concurrent_result_sets: usize,
    ) -> Result<u64> {
        let body = serde_json::to_vec(&EndpointControl::Handshake {
            label: label.to_string(),
            application_name: application_name.to_string(),
            user_name: user_name.to_string(),
            maximum_concurrent_result_sets,
        })
        .map_err(|e| StreamError::Protocol(e.to_string()))?;
        self.socket.send(
            FrameType::RequestPayload,
            0,
            &encode_request_payload(SERVICE_ID_ENDPOINT_BROKER, &body),
        )?;

        let frame = self.expect_frame(Duration::from_secs(5))?;
        match frame.frame_type {
            FrameType::ResponseBody => {
                let reply: EndpointReply = serde_json::from_slice(&frame.payload)
                    .map_err(|e| StreamError::Protocol(e.to_string()))?;
                match reply {
                    EndpointReply::HandshakeOk { session_id } => {
                        self.session_id = Some(session_id);
                        Ok(session_id)
                    }
                    other => Err(StreamError::Protocol(format!(
                        "unexpected handshake reply {other:?}"
                    ))),
                }
            }
            FrameType::ResponseDiagnostic => Err(StreamError::Protocol(
                String::from_utf8_lossy(&frame.payload).to_string(),
            )),
            other => Err(StreamError::Protocol(format!(
                "unexpected handshake frame {other:?}"
            ))),
        }
    }

    /// Session id assigned by the handshake.
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Send one request frame.
    ///
    /// # Errors
    ///
    /// Propagates socket failures.
    pub fn send(&self, slot: u16, service_id: u64, payload: &[u8]) -> Result<()> {
        self.socket.send(
            FrameType::RequestPayload,
            slot,
            &encode_request_payload(service_id, payload),
        )
    }

    /// Read the next response frame.
    ///
    /// # Errors
    ///
    /// Times out with `StreamError::Protocol` when nothing arrives.
    pub fn expect_frame(&self, timeout: Duration) -> Result<StreamFrame> {
        match self.socket.read_frame(timeout)? {
            Some(frame) => Ok(frame),
            None => Err(StreamError::Protocol("no frame within timeout".into())),
        }
    }

    /// Announce session termination and wait for the acknowledgement.
    ///
    /// # Errors
    ///
    /// `StreamError::Protocol` when the server answers anything but
    /// bye-ok.
    pub fn bye(&self) -> Result<()> {
        self.socket.send(FrameType::RequestBye, 0, &[])?;
        loop {
            let frame = self.expect_frame(Duration::from_secs(5))?;
            match frame.frame_type {
                FrameType::ResponseByeOk => return Ok(()),
                // late responses may still be in flight
                _ => continue,
            }
        }
    }

    /// Close without the bye exchange.
    pub fn abort(&self) {
        self.socket.close();
    }
}
