// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Conditional task watcher.
//!
//! A single thread services the shared conditional queue. Each tick drains
//! the queue, calls `check()` on every task, executes the positives
//! immediately, and pushes the negatives back for the next tick. The queue
//! has no peek/remove, so pop-test-push-back is the protocol.
//!
//! A panic in `check()` or in a task body is caught and logged; one broken
//! watcher task must not take the server down. A task whose `check()`
//! panicked stays queued and is retried.

use super::{ConditionalTask, TaskQueue};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// The shared conditional queue plus its watcher control.
pub struct ConditionalQueue {
    queue: TaskQueue<Box<dyn ConditionalTask>>,
    interval: Duration,
    tick_lock: Mutex<()>,
    tick: Condvar,
}

impl ConditionalQueue {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            queue: TaskQueue::new(),
            interval,
            tick_lock: Mutex::new(()),
            tick: Condvar::new(),
        }
    }

    /// Queue a conditional task for the watcher.
    pub fn push(&self, task: Box<dyn ConditionalTask>) {
        self.queue.push(task);
    }

    /// Number of waiting tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Stop accepting tasks and wake the watcher so it can exit.
    pub fn deactivate(&self) {
        self.queue.deactivate();
        let _guard = self.tick_lock.lock();
        self.tick.notify_all();
    }

    /// Spawn the watcher thread.
    pub(super) fn spawn_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        std::thread::Builder::new()
            .name("scheduler-watcher".to_string())
            .spawn(move || this.run())
            .expect("spawn conditional watcher")
    }

    fn run(&self) {
        log::debug!("conditional watcher started");
        let mut negatives: Vec<Box<dyn ConditionalTask>> = Vec::new();
        while self.queue.active() {
            negatives.clear();
            while let Some(mut task) = self.queue.try_pop() {
                match catch_unwind(AssertUnwindSafe(|| task.check())) {
                    Ok(true) => {
                        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task.execute())) {
                            log::error!("conditional task body panicked: {}", panic_text(&panic));
                        }
                    }
                    Ok(false) => negatives.push(task),
                    Err(panic) => {
                        log::error!("conditional task check panicked: {}", panic_text(&panic));
                        negatives.push(task);
                    }
                }
            }
            for task in negatives.drain(..) {
                self.queue.push(task);
            }

            let mut guard = self.tick_lock.lock();
            if self.queue.active() {
                self.tick.wait_for(&mut guard, self.interval);
            }
        }
        log::debug!("conditional watcher finished");
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Instant;

    struct FlagTask {
        ready: Arc<AtomicBool>,
        executed: Arc<AtomicU32>,
        checks: Arc<AtomicU32>,
    }

    impl ConditionalTask for FlagTask {
        fn check(&mut self) -> bool {
            self.checks.fetch_add(1, Ordering::Relaxed);
            self.ready.load(Ordering::Acquire)
        }

        fn execute(&mut self) {
            self.executed.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct PanickyTask;

    impl ConditionalTask for PanickyTask {
        fn check(&mut self) -> bool {
            true
        }

        fn execute(&mut self) {
            panic!("broken watcher task");
        }
    }

    fn wait_until(deadline: Duration, cond: impl Fn() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn executes_once_check_holds() {
        let queue = Arc::new(ConditionalQueue::new(Duration::from_millis(2)));
        let watcher = queue.spawn_watcher();

        let ready = Arc::new(AtomicBool::new(false));
        let executed = Arc::new(AtomicU32::new(0));
        let checks = Arc::new(AtomicU32::new(0));
        queue.push(Box::new(FlagTask {
            ready: Arc::clone(&ready),
            executed: Arc::clone(&executed),
            checks: Arc::clone(&checks),
        }));

        // negative checks keep the task queued
        assert!(wait_until(Duration::from_secs(5), || {
            checks.load(Ordering::Relaxed) >= 3
        }));
        assert_eq!(executed.load(Ordering::Relaxed), 0);

        ready.store(true, Ordering::Release);
        assert!(wait_until(Duration::from_secs(5), || {
            executed.load(Ordering::Relaxed) == 1
        }));

        // executed tasks are dropped, not re-queued
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(executed.load(Ordering::Relaxed), 1);

        queue.deactivate();
        watcher.join().expect("watcher join");
    }

    #[test]
    fn panicking_task_does_not_kill_the_watcher() {
        let queue = Arc::new(ConditionalQueue::new(Duration::from_millis(2)));
        let watcher = queue.spawn_watcher();

        queue.push(Box::new(PanickyTask));

        let ready = Arc::new(AtomicBool::new(true));
        let executed = Arc::new(AtomicU32::new(0));
        let checks = Arc::new(AtomicU32::new(0));
        queue.push(Box::new(FlagTask {
            ready,
            executed: Arc::clone(&executed),
            checks,
        }));

        // the panic is swallowed and later tasks still run
        assert!(wait_until(Duration::from_secs(5), || {
            executed.load(Ordering::Relaxed) == 1
        }));

        queue.deactivate();
        watcher.join().expect("watcher survived");
    }
}
