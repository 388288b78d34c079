// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Loopback round trip: everything a service produces (code, head, body,
//! channel data) and nothing else appears in the buffered response.

use portico::api::{Request, Response, ResponseCode};
use portico::endpoint::loopback::LoopbackEndpoint;
use portico::framework::{BootMode, Component, ComponentId, Server, Service, ServiceError};
use portico::ServerConfiguration;
use std::any::Any;
use std::sync::Arc;

const NCHANNEL: usize = 2;
const NWRITE: usize = 2;
const NLOOP: usize = 2;

const BODY_HEAD: &[u8] = b"body_head";

fn channel_name(ch: usize) -> String {
    format!("ch{ch}")
}

fn channel_data(ch: usize, w: usize, i: usize) -> String {
    format!("ch{ch}-w{w}-{i}")
}

struct DataChannelService;

impl Component for DataChannelService {
    fn label(&self) -> &'static str {
        "loopback:data_channel_service"
    }
}

impl Service for DataChannelService {
    fn id(&self) -> ComponentId {
        1234
    }

    fn call(&self, req: Arc<dyn Request>, res: Arc<dyn Response>) -> Result<(), ServiceError> {
        res.set_session_id(req.session_id());
        res.set_code(ResponseCode::Success);
        res.body_head(BODY_HEAD)?;
        for ch in 0..NCHANNEL {
            let channel = res.acquire_channel(&channel_name(ch))?;
            for w in 0..NWRITE {
                let mut writer = channel.acquire()?;
                for i in 0..NLOOP {
                    writer.write(channel_data(ch, w, i).as_bytes())?;
                    writer.commit()?;
                }
                channel.release(writer)?;
            }
            res.release_channel(channel)?;
        }
        res.body(req.payload())?;
        Ok(())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[test]
fn data_channels_roundtrip() {
    let session_id = 123;
    let request = b"loopback_test";

    let server = Server::new(
        BootMode::DatabaseServer,
        Arc::new(ServerConfiguration::default()),
    );
    server.add_core_components();
    server.add_service(Arc::new(DataChannelService));
    let loopback = Arc::new(LoopbackEndpoint::new());
    server.add_endpoint(Arc::clone(&loopback));
    server.start().expect("server start");

    let response = loopback.request(session_id, 1234, request);
    assert_eq!(response.session_id(), session_id);
    assert_eq!(response.code(), ResponseCode::Success);
    assert_eq!(response.body_head(), BODY_HEAD);
    assert_eq!(response.body(), request);

    for ch in 0..NCHANNEL {
        let chunks = response.channel(&channel_name(ch)).expect("channel data");
        assert_eq!(chunks.len(), NWRITE * NLOOP);
        let mut index = 0;
        for w in 0..NWRITE {
            for i in 0..NLOOP {
                assert_eq!(chunks[index], channel_data(ch, w, i).into_bytes());
                index += 1;
            }
        }
    }
    // nothing but the two channels the service opened
    assert!(!response.has_channel("ch2"));

    server.shutdown().expect("server shutdown");
}

#[test]
fn unknown_service_yields_diagnostic() {
    let server = Server::new(
        BootMode::DatabaseServer,
        Arc::new(ServerConfiguration::default()),
    );
    server.add_core_components();
    let loopback = Arc::new(LoopbackEndpoint::new());
    server.add_endpoint(Arc::clone(&loopback));
    server.start().expect("server start");

    let response = loopback.request(1, 4321, b"to nobody");
    assert_eq!(response.code(), ResponseCode::ApplicationError);
    assert_eq!(
        response.diagnostic().map(|d| d.code),
        Some(portico::diagnostics::DiagnosticCode::ServiceUnavailable)
    );

    server.shutdown().expect("server shutdown");
}
