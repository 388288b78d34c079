// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request routing.
//!
//! The routing service owns the `service_id -> handler` table. Dispatch
//! parses the target id out of the request, looks the handler up, and
//! invokes it synchronously on the calling thread; a handler that wants to
//! leave the endpoint thread hands a task to the scheduler itself.

use super::{Component, ComponentId, Environment, FrameworkError, Service, ServiceError};
use super::SERVICE_ID_ROUTING;
use crate::api::{Request, Response};
use crate::diagnostics::{DiagnosticCode, DiagnosticRecord};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// `service_id -> handler` table and dispatcher.
#[derive(Default)]
pub struct RoutingService {
    services: RwLock<HashMap<ComponentId, Arc<dyn Service>>>,
}

impl RoutingService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own id. A later registration with the
    /// same id replaces the earlier one.
    pub fn register(&self, service: Arc<dyn Service>) {
        let id = service.id();
        if self.services.write().insert(id, service).is_some() {
            log::warn!("routing table entry for service {id} replaced");
        }
    }

    /// Handler registered under the given id.
    #[must_use]
    pub fn find(&self, id: ComponentId) -> Option<Arc<dyn Service>> {
        self.services.read().get(&id).map(Arc::clone)
    }

    /// Route one request to its target service.
    ///
    /// Unknown ids produce a `SERVICE_UNAVAILABLE` error response and count
    /// as handled.
    pub fn dispatch(
        &self,
        req: Arc<dyn Request>,
        res: Arc<dyn Response>,
    ) -> Result<(), ServiceError> {
        let id = req.service_id();
        let Some(service) = self.find(id) else {
            log::warn!("request for unknown service id {id}");
            res.set_session_id(req.session_id());
            res.error(DiagnosticRecord::new(
                DiagnosticCode::ServiceUnavailable,
                format!("no service is registered under id {id}"),
            ));
            return Ok(());
        };
        service.call(req, res)
    }
}

impl Component for RoutingService {
    fn label(&self) -> &'static str {
        "routing_service"
    }

    fn setup(&self, env: &Environment) -> Result<(), FrameworkError> {
        // services usually join the table through Server::add_service;
        // this picks up any repository entry registered another way
        for service in env.service_repository().list() {
            let id = service.id();
            if id != SERVICE_ID_ROUTING && self.find(id).is_none() {
                self.register(service);
            }
        }
        Ok(())
    }
}

impl Service for RoutingService {
    fn id(&self) -> ComponentId {
        SERVICE_ID_ROUTING
    }

    fn call(&self, req: Arc<dyn Request>, res: Arc<dyn Response>) -> Result<(), ServiceError> {
        if req.service_id() == SERVICE_ID_ROUTING {
            // routing meta operations that need session state are answered
            // by the endpoint worker before dispatch reaches this point
            res.set_session_id(req.session_id());
            res.error(DiagnosticRecord::new(
                DiagnosticCode::ServiceUnavailable,
                "the routing service accepts no direct requests",
            ));
            return Ok(());
        }
        self.dispatch(req, res)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
