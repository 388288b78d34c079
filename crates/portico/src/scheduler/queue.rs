// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deactivatable task queue.
//!
//! A thin layer over `crossbeam`'s unbounded MPMC queue adding the active
//! flag the scheduler uses for cooperative shutdown. Pushes to a
//! deactivated queue are dropped.

use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};

/// Unbounded task queue with an activity flag.
pub struct TaskQueue<T> {
    queue: SegQueue<T>,
    active: AtomicBool,
}

impl<T> TaskQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            active: AtomicBool::new(true),
        }
    }

    /// Append a task. Dropped silently once the queue is deactivated.
    pub fn push(&self, task: T) {
        if self.active() {
            self.queue.push(task);
        }
    }

    /// Take the oldest task, if any.
    #[must_use]
    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Number of queued tasks. Approximate under concurrency.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Turn the queue off; pending tasks remain poppable.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
