// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Task contracts.

use std::fmt;
use std::time::Instant;

/// A unit of work for the scheduler.
///
/// Tasks are move-only values: they enter the queues by move and are
/// executed exactly once. `Debug` feeds the scheduler's diagnostics.
pub trait Task: Send + fmt::Debug + 'static {
    /// Whether the task must run on the worker it was scheduled at.
    fn sticky(&self) -> bool {
        false
    }

    /// Earliest moment the task may run, if any.
    fn delayed_until(&self) -> Option<Instant> {
        None
    }

    /// Run the task body.
    fn execute(&mut self);
}

/// A task gated by a predicate, serviced by the watcher thread.
pub trait ConditionalTask: Send + 'static {
    /// Whether the task is ready to run. Polled on every watcher tick.
    fn check(&mut self) -> bool;

    /// Run the task body.
    fn execute(&mut self);
}

/// Closure-backed task used by the framework's services.
pub struct ServerTask {
    body: Option<Box<dyn FnOnce() + Send + 'static>>,
    sticky: bool,
    delayed_until: Option<Instant>,
}

impl ServerTask {
    #[must_use]
    pub fn new(body: impl FnOnce() + Send + 'static) -> Self {
        Self {
            body: Some(Box::new(body)),
            sticky: false,
            delayed_until: None,
        }
    }

    /// Pin the task to the worker it is scheduled at.
    #[must_use]
    pub fn with_sticky(mut self) -> Self {
        self.sticky = true;
        self
    }

    /// Hold the task until the given moment.
    #[must_use]
    pub fn with_delay_until(mut self, at: Instant) -> Self {
        self.delayed_until = Some(at);
        self
    }
}

impl Task for ServerTask {
    fn sticky(&self) -> bool {
        self.sticky
    }

    fn delayed_until(&self) -> Option<Instant> {
        self.delayed_until
    }

    fn execute(&mut self) {
        if let Some(body) = self.body.take() {
            body();
        }
    }
}

impl fmt::Debug for ServerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTask")
            .field("sticky", &self.sticky)
            .field("delayed", &self.delayed_until.is_some())
            .field("spent", &self.body.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn server_task_runs_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let mut task = ServerTask::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
        task.execute();
        task.execute();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn builder_flags() {
        let task = ServerTask::new(|| {}).with_sticky();
        assert!(task.sticky());
        assert!(task.delayed_until().is_none());

        let at = Instant::now();
        let task = ServerTask::new(|| {}).with_delay_until(at);
        assert_eq!(task.delayed_until(), Some(at));
    }
}
