// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framework skeleton.
//!
//! A server is a set of components (resources, services, endpoints)
//! orchestrated through the lifecycle `setup -> start -> shutdown`. The
//! current [`LifecycleState`] lives in the server object; component hooks
//! receive the [`Environment`], never globals.

mod component;
mod environment;
mod ids;
mod routing;
mod scheduler;
mod server;

pub use component::{
    Component, ComponentId, Endpoint, FrameworkError, LifecycleState, Resource, Service,
    ServiceError,
};
pub use environment::{BootMode, Environment, ResourceRepository, ServiceRepository};
pub use ids::{
    RESOURCE_ID_SESSION, RESOURCE_ID_TASK_SCHEDULER, SERVICE_ID_DATASTORE,
    SERVICE_ID_ENDPOINT_BROKER, SERVICE_ID_ROUTING, SERVICE_ID_SESSION,
};
pub use routing::RoutingService;
pub use scheduler::SchedulerResource;
pub use server::Server;
