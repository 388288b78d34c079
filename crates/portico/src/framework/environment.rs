// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Execution environment handed to component hooks.

use super::{ComponentId, Resource, Service};
use crate::config::ServerConfiguration;
use parking_lot::RwLock;
use std::sync::Arc;

/// How the server was booted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootMode {
    #[default]
    DatabaseServer,
    Maintenance,
}

/// Registered resources, looked up by type or id.
#[derive(Default)]
pub struct ResourceRepository {
    items: RwLock<Vec<Arc<dyn Resource>>>,
}

impl ResourceRepository {
    pub fn add(&self, resource: Arc<dyn Resource>) {
        self.items.write().push(resource);
    }

    #[must_use]
    pub fn find<T: Resource + 'static>(&self) -> Option<Arc<T>> {
        self.items
            .read()
            .iter()
            .find_map(|r| Arc::clone(r).into_any().downcast::<T>().ok())
    }

    #[must_use]
    pub fn find_by_id(&self, id: ComponentId) -> Option<Arc<dyn Resource>> {
        self.items
            .read()
            .iter()
            .find(|r| r.id() == id)
            .map(Arc::clone)
    }

    /// Snapshot in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn Resource>> {
        self.items.read().clone()
    }
}

/// Registered services, looked up by type or id.
#[derive(Default)]
pub struct ServiceRepository {
    items: RwLock<Vec<Arc<dyn Service>>>,
}

impl ServiceRepository {
    pub fn add(&self, service: Arc<dyn Service>) {
        self.items.write().push(service);
    }

    #[must_use]
    pub fn find<T: Service + 'static>(&self) -> Option<Arc<T>> {
        self.items
            .read()
            .iter()
            .find_map(|s| Arc::clone(s).into_any().downcast::<T>().ok())
    }

    #[must_use]
    pub fn find_by_id(&self, id: ComponentId) -> Option<Arc<dyn Service>> {
        self.items
            .read()
            .iter()
            .find(|s| s.id() == id)
            .map(Arc::clone)
    }

    /// Snapshot in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn Service>> {
        self.items.read().clone()
    }
}

/// Everything a component may reach during its lifecycle hooks.
pub struct Environment {
    mode: BootMode,
    configuration: Arc<ServerConfiguration>,
    resources: ResourceRepository,
    services: ServiceRepository,
}

impl Environment {
    #[must_use]
    pub fn new(mode: BootMode, configuration: Arc<ServerConfiguration>) -> Self {
        Self {
            mode,
            configuration,
            resources: ResourceRepository::default(),
            services: ServiceRepository::default(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> BootMode {
        self.mode
    }

    #[must_use]
    pub fn configuration(&self) -> &ServerConfiguration {
        &self.configuration
    }

    #[must_use]
    pub fn resource_repository(&self) -> &ResourceRepository {
        &self.resources
    }

    #[must_use]
    pub fn service_repository(&self) -> &ServiceRepository {
        &self.services
    }
}
