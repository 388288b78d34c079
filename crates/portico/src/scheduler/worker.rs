// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scheduler worker loop.
//!
//! Pop priority per iteration: own sticky queue, then own delayed queue
//! (only tasks whose moment has come; the rest go back), then own local
//! queue, then one steal cycle over the other workers' local queues
//! starting after the last successful victim. An idle worker spins through
//! a pause budget before parking on its signal.
//!
//! Sticky and delayed queues are never steal targets, which is what makes
//! the sticky guarantee hold: a sticky task is only ever popped by the
//! worker whose queue it sits in.

use super::{SchedulerState, Task};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Per-worker dynamic context.
#[derive(Debug)]
pub struct WorkerContext {
    index: usize,
    last_steal_from: usize,
}

impl WorkerContext {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            last_steal_from: index,
        }
    }

    /// 0-origin index of the worker this context belongs to.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Index of the worker tasks were last stolen from.
    #[must_use]
    pub fn last_steal_from(&self) -> usize {
        self.last_steal_from
    }
}

/// Execution counters of one worker.
#[derive(Debug, Default)]
pub struct WorkerStat {
    executed: AtomicU64,
    sticky: AtomicU64,
    stolen: AtomicU64,
    wakeups: AtomicU64,
}

impl WorkerStat {
    /// Total tasks executed by this worker.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Tasks taken from the sticky queue.
    #[must_use]
    pub fn sticky(&self) -> u64 {
        self.sticky.load(Ordering::Relaxed)
    }

    /// Tasks stolen from other workers.
    #[must_use]
    pub fn stolen(&self) -> u64 {
        self.stolen.load(Ordering::Relaxed)
    }

    /// Times the worker woke from a park.
    #[must_use]
    pub fn wakeups(&self) -> u64 {
        self.wakeups.load(Ordering::Relaxed)
    }
}

/// Body of one worker thread.
pub(super) fn run<T: Task>(state: &SchedulerState<T>, index: usize) {
    let mut ctx = WorkerContext::new(index);
    let stat = &state.stats[index];
    let mut spins: u32 = 0;

    log::debug!("scheduler worker {index} started");
    while state.locals[index].active() {
        if let Some(mut task) = state.stickies[index].try_pop() {
            stat.sticky.fetch_add(1, Ordering::Relaxed);
            stat.executed.fetch_add(1, Ordering::Relaxed);
            task.execute();
            spins = 0;
            continue;
        }

        if let Some(mut task) = pop_ready_delayed(state, index) {
            stat.executed.fetch_add(1, Ordering::Relaxed);
            task.execute();
            spins = 0;
            continue;
        }

        if let Some(mut task) = state.locals[index].try_pop() {
            stat.executed.fetch_add(1, Ordering::Relaxed);
            task.execute();
            spins = 0;
            continue;
        }

        if let Some(mut task) = steal(state, &mut ctx) {
            stat.stolen.fetch_add(1, Ordering::Relaxed);
            stat.executed.fetch_add(1, Ordering::Relaxed);
            task.execute();
            spins = 0;
            continue;
        }

        if spins < state.cfg.spin_budget {
            spins += 1;
            std::hint::spin_loop();
            continue;
        }

        state.signals[index].park(state.cfg.park_timeout);
        stat.wakeups.fetch_add(1, Ordering::Relaxed);
        spins = 0;
    }
    log::debug!("scheduler worker {index} finished");
}

/// Pop a delayed task whose moment has come; a not-yet-ready task goes
/// straight back (the queue has no peek).
fn pop_ready_delayed<T: Task>(state: &SchedulerState<T>, index: usize) -> Option<T> {
    let task = state.delayed[index].try_pop()?;
    match task.delayed_until() {
        Some(at) if Instant::now() < at => {
            state.delayed[index].push(task);
            None
        }
        _ => Some(task),
    }
}

/// One steal cycle over the other workers' local queues.
fn steal<T: Task>(state: &SchedulerState<T>, ctx: &mut WorkerContext) -> Option<T> {
    let size = state.locals.len();
    if size <= 1 {
        return None;
    }
    let mut victim = ctx.last_steal_from;
    for _ in 0..size {
        victim = (victim + 1) % size;
        if victim == ctx.index {
            continue;
        }
        if let Some(task) = state.locals[victim].try_pop() {
            ctx.last_steal_from = victim;
            return Some(task);
        }
    }
    None
}
