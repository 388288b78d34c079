// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Task scheduler as a framework resource.
//!
//! Compute services offload work from endpoint threads through this
//! resource. The worker count comes from `[sql].thread_pool_size`.

use super::{
    Component, ComponentId, Environment, FrameworkError, Resource, RESOURCE_ID_TASK_SCHEDULER,
};
use crate::scheduler::{Scheduler, SchedulerConfig, ServerTask};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// The server-wide scheduler of [`ServerTask`]s.
pub struct SchedulerResource {
    scheduler: Mutex<Option<Arc<Scheduler<ServerTask>>>>,
}

impl SchedulerResource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scheduler: Mutex::new(None),
        }
    }

    /// The running scheduler. `None` before setup or after shutdown.
    #[must_use]
    pub fn scheduler(&self) -> Option<Arc<Scheduler<ServerTask>>> {
        self.scheduler.lock().clone()
    }
}

impl Default for SchedulerResource {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for SchedulerResource {
    fn label(&self) -> &'static str {
        "task_scheduler_resource"
    }

    fn setup(&self, env: &Environment) -> Result<(), FrameworkError> {
        let thread_count = env
            .configuration()
            .section("sql")
            .and_then(|s| s.get::<usize>("thread_pool_size"))
            .unwrap_or(5);
        let cfg = SchedulerConfig {
            thread_count,
            ..SchedulerConfig::default()
        };
        *self.scheduler.lock() = Some(Arc::new(Scheduler::new(cfg)));
        Ok(())
    }

    fn start(&self, _env: &Environment) -> Result<(), FrameworkError> {
        if let Some(scheduler) = self.scheduler.lock().as_ref() {
            scheduler.start();
        }
        Ok(())
    }

    fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }
        Ok(())
    }
}

impl Resource for SchedulerResource {
    fn id(&self) -> ComponentId {
        RESOURCE_ID_TASK_SCHEDULER
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
