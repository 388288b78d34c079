// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server lifecycle orchestration.

use super::{
    BootMode, Endpoint, Environment, FrameworkError, LifecycleState, Resource, RoutingService,
    SchedulerResource, Service,
};
use crate::config::ServerConfiguration;
use crate::service::DatastoreService;
use crate::session::service::SessionService;
use crate::session::SessionRegistry;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// The framework skeleton: components plus their lifecycle.
///
/// Components are registered first, then driven through
/// `setup -> start -> shutdown`. Shutdown runs in reverse registration
/// order, is idempotent, and may be called without a prior setup or start.
pub struct Server {
    environment: Arc<Environment>,
    endpoints: RwLock<Vec<Arc<dyn Endpoint>>>,
    routing: Arc<RoutingService>,
    state: Mutex<LifecycleState>,
}

impl Server {
    #[must_use]
    pub fn new(mode: BootMode, configuration: Arc<ServerConfiguration>) -> Self {
        let server = Self {
            environment: Arc::new(Environment::new(mode, configuration)),
            endpoints: RwLock::new(Vec::new()),
            routing: Arc::new(RoutingService::new()),
            state: Mutex::new(LifecycleState::Initial),
        };
        server
            .environment
            .service_repository()
            .add(Arc::clone(&server.routing) as Arc<dyn Service>);
        server
    }

    /// Register the standard resources and services: session registry,
    /// task scheduler, session administration, datastore.
    pub fn add_core_components(&self) {
        self.add_resource(Arc::new(SessionRegistry::new()));
        self.add_resource(Arc::new(SchedulerResource::new()));
        self.add_service(Arc::new(SessionService::new()));
        self.add_service(Arc::new(DatastoreService::new()));
    }

    pub fn add_resource(&self, resource: Arc<impl Resource + 'static>) {
        self.environment.resource_repository().add(resource);
    }

    /// Register a service; it also joins the routing table.
    pub fn add_service(&self, service: Arc<impl Service + 'static>) {
        self.environment
            .service_repository()
            .add(Arc::clone(&service) as Arc<dyn Service>);
        self.routing.register(service);
    }

    pub fn add_endpoint(&self, endpoint: Arc<impl Endpoint + 'static>) {
        self.endpoints.write().push(endpoint);
    }

    /// The routing service shared with endpoint workers.
    #[must_use]
    pub fn routing_service(&self) -> Arc<RoutingService> {
        Arc::clone(&self.routing)
    }

    #[must_use]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    #[must_use]
    pub fn find_resource<T: Resource + 'static>(&self) -> Option<Arc<T>> {
        self.environment.resource_repository().find::<T>()
    }

    #[must_use]
    pub fn find_service<T: Service + 'static>(&self) -> Option<Arc<T>> {
        self.environment.service_repository().find::<T>()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Set up every component in registration order: resources, services,
    /// endpoints.
    ///
    /// # Errors
    ///
    /// Stops at the first failing component; the state stays `Initial`.
    pub fn setup(&self) -> Result<(), FrameworkError> {
        let env = &self.environment;
        for resource in env.resource_repository().list() {
            log::trace!("setup resource {}", resource.label());
            resource.setup(env)?;
        }
        for service in env.service_repository().list() {
            log::trace!("setup service {}", service.label());
            service.setup(env)?;
        }
        for endpoint in self.endpoints.read().iter() {
            log::trace!("setup endpoint {}", endpoint.label());
            endpoint.setup(env)?;
        }
        *self.state.lock() = LifecycleState::Ready;
        Ok(())
    }

    /// Start every component. Runs `setup` first when still `Initial`.
    ///
    /// # Errors
    ///
    /// A start failure triggers a best-effort shutdown of everything
    /// already started before the error is returned.
    pub fn start(&self) -> Result<(), FrameworkError> {
        if self.state() == LifecycleState::Initial {
            self.setup()?;
        }
        let env = &self.environment;
        let result = (|| {
            for resource in env.resource_repository().list() {
                log::trace!("start resource {}", resource.label());
                resource.start(env)?;
            }
            for service in env.service_repository().list() {
                log::trace!("start service {}", service.label());
                service.start(env)?;
            }
            for endpoint in self.endpoints.read().iter() {
                log::trace!("start endpoint {}", endpoint.label());
                endpoint.start(env)?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                *self.state.lock() = LifecycleState::Activated;
                log::info!("server activated");
                Ok(())
            }
            Err(e) => {
                log::error!("server start failed: {e}");
                let _ = self.shutdown();
                Err(e)
            }
        }
    }

    /// Shut down every component in reverse order: endpoints, services,
    /// resources. Idempotent.
    ///
    /// # Errors
    ///
    /// The first component failure is returned, but shutdown continues
    /// through the remaining components regardless.
    pub fn shutdown(&self) -> Result<(), FrameworkError> {
        {
            let state = self.state.lock();
            if *state == LifecycleState::Deactivated {
                return Ok(());
            }
        }
        let env = &self.environment;
        let mut first_error = None;

        for endpoint in self.endpoints.read().iter().rev() {
            log::trace!("shutdown endpoint {}", endpoint.label());
            if let Err(e) = endpoint.shutdown(env) {
                log::error!("endpoint {} shutdown failed: {e}", endpoint.label());
                first_error.get_or_insert(e);
            }
        }
        for service in env.service_repository().list().into_iter().rev() {
            log::trace!("shutdown service {}", service.label());
            if let Err(e) = service.shutdown(env) {
                log::error!("service {} shutdown failed: {e}", service.label());
                first_error.get_or_insert(e);
            }
        }
        for resource in env.resource_repository().list().into_iter().rev() {
            log::trace!("shutdown resource {}", resource.label());
            if let Err(e) = resource.shutdown(env) {
                log::error!("resource {} shutdown failed: {e}", resource.label());
                first_error.get_or_insert(e);
            }
        }

        *self.state.lock() = LifecycleState::Deactivated;
        log::info!("server deactivated");
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
