// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stealing-based task scheduler.
//!
//! Each worker owns three queues: a local queue (stealable), a sticky queue
//! (only ever popped by the owning worker), and a delayed queue (tasks with
//! an earliest-execution moment). A single watcher thread services a shared
//! conditional queue of tasks gated by a predicate.
//!
//! Scheduling priority in [`Scheduler::schedule_at`]: delayed beats sticky
//! beats local, so a task that is both sticky and delayed sits in the
//! delayed queue of its worker until ready.

mod conditional;
mod queue;
mod task;
mod worker;

pub use conditional::ConditionalQueue;
pub use queue::TaskQueue;
pub use task::{ConditionalTask, ServerTask, Task};
pub use worker::{WorkerContext, WorkerStat};

use parking_lot::Mutex;
use std::cell::Cell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads (and queue triples).
    pub thread_count: usize,
    /// Idle iterations spent spinning before a worker parks.
    pub spin_budget: u32,
    /// Upper bound of one parked wait; parked workers re-scan for stealable
    /// work at this cadence.
    pub park_timeout: Duration,
    /// Tick interval of the conditional watcher.
    pub watcher_interval: Duration,
    /// Route `schedule` through the caller's preferred worker instead of
    /// plain round-robin.
    pub use_preferred_worker: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_count: 5,
            spin_budget: 1_000,
            park_timeout: Duration::from_millis(10),
            watcher_interval: Duration::from_millis(10),
            use_preferred_worker: true,
        }
    }
}

struct WorkerSignal {
    lock: Mutex<bool>,
    condvar: parking_lot::Condvar,
}

impl WorkerSignal {
    fn new() -> Self {
        Self {
            lock: Mutex::new(false),
            condvar: parking_lot::Condvar::new(),
        }
    }

    fn notify(&self) {
        let mut pending = self.lock.lock();
        *pending = true;
        self.condvar.notify_one();
    }

    fn park(&self, timeout: Duration) {
        let mut pending = self.lock.lock();
        if !*pending {
            self.condvar.wait_for(&mut pending, timeout);
        }
        *pending = false;
    }
}

struct SchedulerState<T: Task> {
    cfg: SchedulerConfig,
    locals: Vec<TaskQueue<T>>,
    stickies: Vec<TaskQueue<T>>,
    delayed: Vec<TaskQueue<T>>,
    stats: Vec<WorkerStat>,
    signals: Vec<WorkerSignal>,
    initial: Vec<Mutex<Vec<T>>>,
    started: AtomicBool,
}

thread_local! {
    static PREFERRED_WORKER: Cell<usize> = const { Cell::new(usize::MAX) };
}

/// The work-stealing scheduler.
///
/// `T` is the task type; tasks move into the queues on scheduling and out
/// on execution.
pub struct Scheduler<T: Task> {
    state: Arc<SchedulerState<T>>,
    conditional: Arc<ConditionalQueue>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    current_index: AtomicUsize,
}

impl<T: Task> Scheduler<T> {
    #[must_use]
    pub fn new(cfg: SchedulerConfig) -> Self {
        let size = cfg.thread_count.max(1);
        let mut locals = Vec::with_capacity(size);
        let mut stickies = Vec::with_capacity(size);
        let mut delayed = Vec::with_capacity(size);
        let mut stats = Vec::with_capacity(size);
        let mut signals = Vec::with_capacity(size);
        let mut initial = Vec::with_capacity(size);
        for _ in 0..size {
            locals.push(TaskQueue::new());
            stickies.push(TaskQueue::new());
            delayed.push(TaskQueue::new());
            stats.push(WorkerStat::default());
            signals.push(WorkerSignal::new());
            initial.push(Mutex::new(Vec::new()));
        }
        let watcher_interval = cfg.watcher_interval;
        Self {
            state: Arc::new(SchedulerState {
                cfg,
                locals,
                stickies,
                delayed,
                stats,
                signals,
                initial,
                started: AtomicBool::new(false),
            }),
            conditional: Arc::new(ConditionalQueue::new(watcher_interval)),
            threads: Mutex::new(Vec::new()),
            current_index: AtomicUsize::new(0),
        }
    }

    /// Number of workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.locals.len()
    }

    /// Worker index preferred for the calling thread, assigned round-robin
    /// on first use.
    pub fn preferred_worker_for_current_thread(&self) -> usize {
        PREFERRED_WORKER.with(|cell| {
            let mut index = cell.get();
            if index == usize::MAX {
                index = self.next_worker();
                cell.set(index);
                log::debug!("assigned preferred worker {index} for current thread");
            }
            index % self.size()
        })
    }

    fn next_worker(&self) -> usize {
        self.current_index.fetch_add(1, Ordering::Relaxed) % self.size()
    }

    /// Schedule a task on the caller's preferred worker (round-robin when
    /// preference is disabled).
    pub fn schedule(&self, task: T) {
        let index = if self.state.cfg.use_preferred_worker {
            self.preferred_worker_for_current_thread()
        } else {
            self.next_worker()
        };
        self.schedule_at(task, index);
    }

    /// Schedule a task on the given worker's queues.
    ///
    /// Priority: delayed queue when the task has an earliest-execution
    /// moment, else sticky queue when sticky, else local. Before
    /// [`Scheduler::start`] the task is buffered and routed at start time.
    pub fn schedule_at(&self, task: T, index: usize) {
        debug_assert!(index < self.size());
        if !self.state.started.load(Ordering::Acquire) {
            self.state.initial[index].lock().push(task);
            return;
        }
        Self::route(&self.state, task, index);
        self.state.signals[index].notify();
    }

    fn route(state: &SchedulerState<T>, task: T, index: usize) {
        if task.delayed_until().is_some() {
            state.delayed[index].push(task);
        } else if task.sticky() {
            state.stickies[index].push(task);
        } else {
            state.locals[index].push(task);
        }
    }

    /// Schedule a conditional task; the watcher executes it once its
    /// `check()` holds.
    pub fn schedule_conditional(&self, task: Box<dyn ConditionalTask>) {
        self.conditional.push(task);
    }

    /// Start worker threads and the conditional watcher.
    ///
    /// Not thread-safe; call once before using the scheduler.
    pub fn start(&self) {
        let mut threads = self.threads.lock();
        for index in 0..self.size() {
            for task in self.state.initial[index].lock().drain(..) {
                Self::route(&self.state, task, index);
            }
        }
        for index in 0..self.size() {
            let state = Arc::clone(&self.state);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("scheduler-worker-{index}"))
                    .spawn(move || worker::run(&state, index))
                    .expect("spawn scheduler worker"),
            );
        }
        threads.push(self.conditional.spawn_watcher());

        // Give freshly created queues and threads a moment to settle before
        // tasks start flowing; popping immediately after creation has shown
        // instability in the underlying concurrent queue.
        std::thread::sleep(Duration::from_millis(1));

        self.state.started.store(true, Ordering::Release);
    }

    /// Deactivate every queue and join every thread.
    ///
    /// Not thread-safe; call once when finished with the scheduler.
    pub fn stop(&self) {
        for q in &self.state.locals {
            q.deactivate();
        }
        for q in &self.state.stickies {
            q.deactivate();
        }
        for q in &self.state.delayed {
            q.deactivate();
        }
        for signal in &self.state.signals {
            signal.notify();
        }
        self.conditional.deactivate();
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
        self.state.started.store(false, Ordering::Release);
    }

    /// Per-worker execution statistics.
    #[must_use]
    pub fn worker_stats(&self) -> &[WorkerStat] {
        &self.state.stats
    }

    /// Emit worker counts and per-queue task snapshots.
    ///
    /// Queues are inspected by popping every task into a temporary and
    /// pushing it back; concurrent pops observe a momentarily empty queue.
    pub fn print_diagnostic(&self, out: &mut impl Write) -> std::io::Result<()> {
        if !self.state.started.load(Ordering::Acquire) {
            return Ok(());
        }
        let count = self.size();
        writeln!(out, "worker_count: {count}")?;
        writeln!(out, "workers:")?;
        for index in 0..count {
            writeln!(out, "  - worker_index: {index}")?;
            writeln!(out, "    stat: {:?}", self.state.stats[index])?;
            writeln!(out, "    queues:")?;
            writeln!(out, "      local:")?;
            Self::print_queue_diagnostic(&self.state.locals[index], out)?;
            writeln!(out, "      sticky:")?;
            Self::print_queue_diagnostic(&self.state.stickies[index], out)?;
            writeln!(out, "      delayed:")?;
            Self::print_queue_diagnostic(&self.state.delayed[index], out)?;
        }
        Ok(())
    }

    fn print_queue_diagnostic(queue: &TaskQueue<T>, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "        task_count: {}", queue.len())?;
        if queue.is_empty() {
            return Ok(());
        }
        writeln!(out, "        tasks:")?;
        let mut backup = Vec::new();
        while let Some(task) = queue.try_pop() {
            writeln!(out, "          - {task:?}")?;
            backup.push(task);
        }
        for task in backup {
            queue.push(task);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;

    #[derive(Debug)]
    struct CountingTask {
        counter: Arc<AtomicU64>,
        sticky: bool,
        delayed_until: Option<Instant>,
    }

    impl CountingTask {
        fn plain(counter: &Arc<AtomicU64>) -> Self {
            Self {
                counter: Arc::clone(counter),
                sticky: false,
                delayed_until: None,
            }
        }
    }

    impl Task for CountingTask {
        fn sticky(&self) -> bool {
            self.sticky
        }

        fn delayed_until(&self) -> Option<Instant> {
            self.delayed_until
        }

        fn execute(&mut self) {
            self.counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn wait_for(counter: &AtomicU64, expected: u64, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        while Instant::now() < deadline {
            if counter.load(Ordering::Relaxed) >= expected {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn executes_scheduled_tasks() {
        let scheduler = Scheduler::new(SchedulerConfig {
            thread_count: 2,
            ..SchedulerConfig::default()
        });
        let counter = Arc::new(AtomicU64::new(0));
        scheduler.start();
        for _ in 0..16 {
            scheduler.schedule(CountingTask::plain(&counter));
        }
        assert!(wait_for(&counter, 16, Duration::from_secs(5)));
        scheduler.stop();
    }

    #[test]
    fn buffers_tasks_scheduled_before_start() {
        let scheduler = Scheduler::new(SchedulerConfig {
            thread_count: 2,
            ..SchedulerConfig::default()
        });
        let counter = Arc::new(AtomicU64::new(0));
        scheduler.schedule_at(CountingTask::plain(&counter), 0);
        scheduler.schedule_at(CountingTask::plain(&counter), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        scheduler.start();
        assert!(wait_for(&counter, 2, Duration::from_secs(5)));
        scheduler.stop();
    }

    #[test]
    fn delayed_task_waits_for_its_moment() {
        let scheduler = Scheduler::new(SchedulerConfig {
            thread_count: 1,
            ..SchedulerConfig::default()
        });
        let counter = Arc::new(AtomicU64::new(0));
        scheduler.start();

        scheduler.schedule_at(
            CountingTask {
                counter: Arc::clone(&counter),
                sticky: false,
                delayed_until: Some(Instant::now() + Duration::from_millis(150)),
            },
            0,
        );
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert!(wait_for(&counter, 1, Duration::from_secs(5)));
        scheduler.stop();
    }

    #[test]
    fn steals_from_a_loaded_worker() {
        let scheduler = Scheduler::new(SchedulerConfig {
            thread_count: 4,
            ..SchedulerConfig::default()
        });
        let counter = Arc::new(AtomicU64::new(0));
        // Pile everything on worker 0 before start; the other workers have
        // nothing and must steal to finish quickly.
        for _ in 0..64 {
            scheduler.schedule_at(CountingTask::plain(&counter), 0);
        }
        scheduler.start();
        assert!(wait_for(&counter, 64, Duration::from_secs(5)));
        scheduler.stop();

        let stolen: u64 = scheduler
            .worker_stats()
            .iter()
            .map(WorkerStat::stolen)
            .sum();
        let executed: u64 = scheduler
            .worker_stats()
            .iter()
            .map(WorkerStat::executed)
            .sum();
        assert_eq!(executed, 64);
        let _ = stolen; // stealing is timing-dependent; executed count is the contract
    }

    #[derive(Debug)]
    struct GatedTask {
        entered: Arc<AtomicU64>,
        gate: Arc<AtomicU64>,
    }

    impl Task for GatedTask {
        fn execute(&mut self) {
            self.entered.store(1, Ordering::Release);
            while self.gate.load(Ordering::Acquire) == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    #[test]
    fn print_diagnostic_preserves_queue_contents() {
        let scheduler = Scheduler::new(SchedulerConfig {
            thread_count: 1,
            ..SchedulerConfig::default()
        });
        let counter = Arc::new(AtomicU64::new(0));
        let entered = Arc::new(AtomicU64::new(0));
        let gate = Arc::new(AtomicU64::new(0));
        scheduler.start();

        // Occupy the only worker, then queue tasks behind it so the queue
        // snapshot is stable while the diagnostic runs.
        scheduler.schedule_at(
            GatedTask {
                entered: Arc::clone(&entered),
                gate: Arc::clone(&gate),
            },
            0,
        );
        assert!(wait_for(&entered, 1, Duration::from_secs(5)));
        for _ in 0..3 {
            scheduler.schedule_at(CountingTask::plain(&counter), 0);
        }

        let mut buf = Vec::new();
        scheduler.print_diagnostic(&mut buf).expect("diagnostic");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("worker_count: 1"));
        assert!(text.contains("task_count: 3"));

        gate.store(1, Ordering::Release);
        assert!(wait_for(&counter, 3, Duration::from_secs(5)));
        scheduler.stop();
    }

    #[test]
    fn print_diagnostic_before_start_prints_nothing() {
        let scheduler: Scheduler<CountingTask> = Scheduler::new(SchedulerConfig::default());
        let mut buf = Vec::new();
        scheduler.print_diagnostic(&mut buf).expect("diagnostic");
        assert!(buf.is_empty());
    }
}
