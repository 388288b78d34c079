// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint control messages and request payload framing.
//!
//! A request frame's payload starts with the 8-byte little-endian target
//! service id, followed by the service payload proper. The service payload
//! stays opaque to the core; only the endpoint control messages defined
//! here (handshake, cancel, routing meta) are decoded by the worker, as
//! length-delimited tagged JSON.

use serde::{Deserialize, Serialize};

/// Control messages addressed to the endpoint broker or routing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EndpointControl {
    /// First message of every session.
    #[serde(rename = "handshake")]
    Handshake {
        #[serde(default)]
        label: String,
        #[serde(default)]
        application_name: String,
        #[serde(default)]
        user_name: String,
        /// Upper bound of concurrently open result-set channels the client
        /// is prepared to read.
        maximum_concurrent_result_sets: usize,
    },

    /// Cooperative cancel of the request outstanding on the carrying slot.
    #[serde(rename = "cancel")]
    Cancel,

    /// Routing meta operation: move or clear the session expiration.
    #[serde(rename = "update_expiration_time")]
    UpdateExpirationTime {
        /// Remaining lifetime in milliseconds; `None` clears the limit.
        expiration_ms: Option<u64>,
    },
}

/// Replies to endpoint control messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EndpointReply {
    #[serde(rename = "handshake_ok")]
    HandshakeOk { session_id: u64 },

    #[serde(rename = "success")]
    Success,
}

/// Prefix a service payload with its target service id.
#[must_use]
pub fn encode_request_payload(service_id: u64, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(8 + payload.len());
    framed.extend_from_slice(&service_id.to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Split a frame payload into target service id and service payload.
#[must_use]
pub fn decode_request_payload(bytes: &[u8]) -> Option<(u64, &[u8])> {
    if bytes.len() < 8 {
        return None;
    }
    let (head, rest) = bytes.split_at(8);
    let service_id = u64::from_le_bytes(head.try_into().expect("8-byte slice"));
    Some((service_id, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_framing_roundtrip() {
        let framed = encode_request_payload(42, b"command body");
        let (service_id, rest) = decode_request_payload(&framed).expect("well-formed");
        assert_eq!(service_id, 42);
        assert_eq!(rest, b"command body");
    }

    #[test]
    fn short_payload_is_rejected() {
        assert!(decode_request_payload(&[1, 2, 3]).is_none());
    }

    #[test]
    fn handshake_encodes_tagged() {
        let msg = EndpointControl::Handshake {
            label: "cli".into(),
            application_name: "demo".into(),
            user_name: "alice".into(),
            maximum_concurrent_result_sets: 8,
        };
        let text = serde_json::to_string(&msg).expect("encode");
        assert!(text.contains("\"type\":\"handshake\""));
        let back: EndpointControl = serde_json::from_str(&text).expect("decode");
        match back {
            EndpointControl::Handshake {
                maximum_concurrent_result_sets,
                ..
            } => assert_eq!(maximum_concurrent_result_sets, 8),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn arbitrary_bytes_are_not_a_handshake() {
        let result: Result<EndpointControl, _> = serde_json::from_slice(b"\x00\x01garbage");
        assert!(result.is_err());
    }
}
