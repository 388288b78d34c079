// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session registry garbage collection, observed through the session
//! service: dropping the sole owner of a context makes it disappear from
//! the listing without any deregistration call.

use portico::api::{ConnectionKind, SessionInfo};
use portico::endpoint::loopback::LoopbackEndpoint;
use portico::framework::{BootMode, Server, SERVICE_ID_SESSION};
use portico::session::service::{SessionCommand, SessionReply};
use portico::session::{
    SessionContext, SessionRegistry, SessionVariableSet, VariableDeclaration, VariableType,
    VariableValue,
};
use portico::ServerConfiguration;
use std::sync::Arc;

fn session_list(loopback: &LoopbackEndpoint) -> Vec<u64> {
    let payload = serde_json::to_vec(&SessionCommand::List).expect("encode");
    let response = loopback.request(10, SERVICE_ID_SESSION, &payload);
    assert_eq!(response.session_id(), 10);
    let reply: SessionReply = serde_json::from_slice(response.body()).expect("decode");
    match reply {
        SessionReply::List { entries } => entries.iter().map(|e| e.session_id).collect(),
        other => panic!("unexpected reply {other:?}"),
    }
}

fn existing_session_context() -> Arc<SessionContext> {
    let mut info = SessionInfo::new(111, ConnectionKind::Ipc, "ipc:9999");
    info.label = "label_for_test".to_string();
    info.application_name = "application_for_test".to_string();
    info.user_name = "user_for_test".to_string();
    let declarations = vec![VariableDeclaration::new(
        "test_integer",
        VariableType::SignedInteger,
        Some(VariableValue::SignedInteger(123)),
    )];
    Arc::new(SessionContext::new(
        info,
        SessionVariableSet::new(declarations),
    ))
}

#[test]
fn session_disappears_when_owner_drops() {
    let server = Server::new(
        BootMode::DatabaseServer,
        Arc::new(ServerConfiguration::default()),
    );
    server.add_core_components();
    let loopback = Arc::new(LoopbackEndpoint::new());
    server.add_endpoint(Arc::clone(&loopback));
    server.start().expect("server start");

    let registry = server
        .find_resource::<SessionRegistry>()
        .expect("session registry");

    assert_eq!(session_list(&loopback).len(), 0);

    let mut context = Some(existing_session_context());
    assert!(registry.register(context.as_ref().expect("context")));
    assert_eq!(session_list(&loopback), vec![111]);

    // drop the sole strong reference; no explicit deregistration
    context.take();
    assert_eq!(session_list(&loopback).len(), 0);

    server.shutdown().expect("server shutdown");
}

#[test]
fn variables_reachable_through_the_service() {
    let server = Server::new(
        BootMode::DatabaseServer,
        Arc::new(ServerConfiguration::default()),
    );
    server.add_core_components();
    let loopback = Arc::new(LoopbackEndpoint::new());
    server.add_endpoint(Arc::clone(&loopback));
    server.start().expect("server start");

    let registry = server
        .find_resource::<SessionRegistry>()
        .expect("session registry");
    let context = existing_session_context();
    assert!(registry.register(&context));

    let payload = serde_json::to_vec(&SessionCommand::GetVariable {
        specifier: ":111".into(),
        name: "test_integer".into(),
    })
    .expect("encode");
    let response = loopback.request(10, SERVICE_ID_SESSION, &payload);
    let reply: SessionReply = serde_json::from_slice(response.body()).expect("decode");
    match reply {
        SessionReply::GetVariable { value, .. } => {
            assert_eq!(value, Some(VariableValue::SignedInteger(123)));
        }
        other => panic!("unexpected reply {other:?}"),
    }

    server.shutdown().expect("server shutdown");
}
