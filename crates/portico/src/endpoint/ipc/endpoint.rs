// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IPC endpoint component.

use super::connection_queue::ConnectionContainer;
use super::listener::IpcListener;
use crate::api::DatabaseInfo;
use crate::endpoint::common::WorkerAttributes;
use crate::framework::{Component, Endpoint, Environment, FrameworkError, RoutingService};
use crate::session::SessionRegistry;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Shared-memory endpoint: admission queue plus one worker per session.
#[derive(Default)]
pub struct IpcEndpoint {
    attrs: WorkerAttributes,
    listener: Mutex<Option<Arc<IpcListener>>>,
    listener_thread: Mutex<Option<JoinHandle<()>>>,
}

impl IpcEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the session worker tuning.
    #[must_use]
    pub fn with_worker_attributes(mut self, attrs: WorkerAttributes) -> Self {
        self.attrs = attrs;
        self
    }
}

impl Component for IpcEndpoint {
    fn label(&self) -> &'static str {
        "ipc_endpoint"
    }

    fn setup(&self, env: &Environment) -> Result<(), FrameworkError> {
        let section = env.configuration().section("ipc_endpoint").ok_or_else(|| {
            FrameworkError::Setup("ipc_endpoint", "missing [ipc_endpoint] section".into())
        })?;
        let database_name: String = section.get("database_name").ok_or_else(|| {
            FrameworkError::Setup("ipc_endpoint", "database_name is not configured".into())
        })?;
        let threads: usize = section.get("threads").ok_or_else(|| {
            FrameworkError::Setup("ipc_endpoint", "threads is not configured".into())
        })?;
        let admin_sessions: usize = section.get("admin_sessions").unwrap_or(1);

        let routing = env
            .service_repository()
            .find::<RoutingService>()
            .ok_or_else(|| {
                FrameworkError::Setup("ipc_endpoint", "routing service missing".into())
            })?;
        let registry = env.resource_repository().find::<SessionRegistry>();

        let stale = crate::shm::cleanup_database_segments(&database_name);
        if stale > 0 {
            log::info!("removed {stale} stale segments of database {database_name}");
        }

        let container = ConnectionContainer::create(&database_name, threads, admin_sessions)
            .map_err(|e| FrameworkError::Setup("ipc_endpoint", e.to_string()))?;

        let listener = IpcListener::new(
            database_name.clone(),
            Arc::new(container),
            routing,
            registry,
            Arc::new(DatabaseInfo::new(database_name)),
            self.attrs.clone(),
        );
        *self.listener.lock() = Some(Arc::new(listener));
        Ok(())
    }

    fn start(&self, _env: &Environment) -> Result<(), FrameworkError> {
        let listener = self
            .listener
            .lock()
            .clone()
            .ok_or_else(|| FrameworkError::Start("ipc_endpoint", "endpoint not set up".into()))?;
        let thread = std::thread::Builder::new()
            .name("ipc-listener".to_string())
            .spawn(move || listener.run())
            .map_err(|e| FrameworkError::Start("ipc_endpoint", e.to_string()))?;
        *self.listener_thread.lock() = Some(thread);
        Ok(())
    }

    fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
        if let Some(listener) = self.listener.lock().as_ref() {
            listener.terminate();
        }
        if let Some(thread) = self.listener_thread.lock().take() {
            let _ = thread.join();
        }
        // dropping the listener releases the container, unlinking the
        // connection queue segment
        self.listener.lock().take();
        Ok(())
    }
}

impl Endpoint for IpcEndpoint {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
