// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream endpoint component.

use super::listener::StreamListener;
use crate::api::DatabaseInfo;
use crate::endpoint::common::WorkerAttributes;
use crate::framework::{Component, Endpoint, Environment, FrameworkError, RoutingService};
use crate::session::SessionRegistry;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;

/// TCP endpoint: one listener, one worker thread per session.
#[derive(Default)]
pub struct StreamEndpoint {
    attrs: WorkerAttributes,
    listener: Mutex<Option<Arc<StreamListener>>>,
    listener_thread: Mutex<Option<JoinHandle<()>>>,
}

impl StreamEndpoint {
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

    /// Bound port; 0 before setup. Lets tests bind port 0 and discover
    /// the actual port.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.listener
            .lock()
            .as_ref()
            .map_or(0, |l| l.local_port())
    }
}

impl Component for StreamEndpoint {
    fn label(&self) -> &'static str {
        "stream_endpoint"
    }

    fn setup(&self, env: &Environment) -> Result<(), FrameworkError> {
        let section = env.configuration().section("stream_endpoint").ok_or_else(|| {
            FrameworkError::Setup("stream_endpoint", "missing [stream_endpoint] section".into())
        })?;
        let port: u16 = section.get("port").ok_or_else(|| {
            FrameworkError::Setup("stream_endpoint", "port is not configured".into())
        })?;
        let threads: usize = section.get("threads").ok_or_else(|| {
            FrameworkError::Setup("stream_endpoint", "threads is not configured".into())
        })?;

        let routing = env
            .service_repository()
            .find::<RoutingService>()
            .ok_or_else(|| {
                FrameworkError::Setup("stream_endpoint", "routing service missing".into())
            })?;
        let registry = env.resource_repository().find::<SessionRegistry>();
        let database_name: String = env
            .configuration()
            .section("ipc_endpoint")
            .and_then(|s| s.get("database_name"))
            .unwrap_or_else(|| "portico".to_string());

        let listener = StreamListener::bind(
            port,
            threads,
            routing,
            registry,
            Arc::new(DatabaseInfo::new(database_name)),
            self.attrs.clone(),
        )
        .map_err(|e| FrameworkError::Setup("stream_endpoint", e.to_string()))?;
        *self.listener.lock() = Some(Arc::new(listener));
        Ok(())
    }

    fn start(&self, _env: &Environment) -> Result<(), FrameworkError> {
        let listener = self.listener.lock().clone().ok_or_else(|| {
            FrameworkError::Start("stream_endpoint", "endpoint not set up".into())
        })?;
        let thread = std::thread::Builder::new()
            .name("stream-listener".to_string())
            .spawn(move || listener.run())
            .map_err(|e| FrameworkError::Start("stream_endpoint", e.to_string()))?;
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
        self.listener.lock().take();
        Ok(())
    }
}

impl Endpoint for StreamEndpoint {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
