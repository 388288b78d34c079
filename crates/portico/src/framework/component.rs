// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Component contracts and lifecycle.

use super::Environment;
use crate::api::{Request, Response};
use crate::diagnostics::DiagnosticRecord;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Numeric id of a component.
pub type ComponentId = u64;

/// Lifecycle phase of the server and its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, nothing prepared.
    Initial,
    /// `setup` completed on every component.
    Ready,
    /// `start` completed; endpoints accept connections.
    Activated,
    /// `shutdown` completed.
    Deactivated,
}

/// Errors from lifecycle orchestration.
#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("component {0} failed to set up: {1}")]
    Setup(&'static str, String),

    #[error("component {0} failed to start: {1}")]
    Start(&'static str, String),

    #[error("component {0} failed to shut down: {1}")]
    Shutdown(&'static str, String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Errors a service may raise while handling a request.
///
/// A service that already delivered a diagnostic to the client returns
/// `Ok(())`; an `Err` tells the endpoint worker the session is beyond
/// recovery and must close.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("malformed request payload: {0}")]
    Decode(String),

    #[error(transparent)]
    Response(#[from] crate::api::ResponseError),

    #[error("{0}")]
    Diagnostic(DiagnosticRecord),

    #[error("internal service failure: {0}")]
    Internal(String),
}

/// Common component surface.
///
/// Hooks default to no-ops so trivial components only implement what they
/// need. Hooks run in lifecycle order: `setup` on every component before
/// any `start`, `shutdown` in reverse registration order.
pub trait Component: Send + Sync {
    /// Human-readable label for logs and diagnostics.
    fn label(&self) -> &'static str;

    /// Prepare the component; the state becomes `Ready`.
    fn setup(&self, _env: &Environment) -> Result<(), FrameworkError> {
        Ok(())
    }

    /// Activate the component; the state becomes `Activated`.
    fn start(&self, _env: &Environment) -> Result<(), FrameworkError> {
        Ok(())
    }

    /// Deactivate the component; the state becomes `Deactivated`.
    ///
    /// May be called multiple times, with or without prior setup/start.
    fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
        Ok(())
    }
}

/// A passive component other components depend on.
pub trait Resource: Component {
    fn id(&self) -> ComponentId;

    /// Upcast for typed repository lookup.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A request handler addressable by service id.
pub trait Service: Component {
    fn id(&self) -> ComponentId;

    /// Handle one request, answering through `res`.
    fn call(&self, req: Arc<dyn Request>, res: Arc<dyn Response>) -> Result<(), ServiceError>;

    /// Upcast for typed repository lookup.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A connection entry point.
pub trait Endpoint: Component {
    /// Upcast for typed repository lookup.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
