// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-process futex wait/wake.
//!
//! The `FUTEX_WAIT`/`FUTEX_WAKE` opcodes here are the SHARED variants, not
//! `_PRIVATE`: the private forms only match waiters inside one process and
//! silently fail to wake a peer that mapped the same shared memory.
//!
//! [`EventCell`] layers a monotonically bumped event counter on top, the
//! building block for the connection queue's semaphore-like counters and the
//! wire rings' blocking reads. Consumers snapshot the counter, re-check
//! their condition, and only then wait: the snapshot/re-check pair closes
//! the lost-wake window.

use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[cfg(target_os = "linux")]
const FUTEX_WAIT: i32 = 0; // not 128 (FUTEX_WAIT_PRIVATE)
#[cfg(target_os = "linux")]
const FUTEX_WAKE: i32 = 1; // not 129 (FUTEX_WAKE_PRIVATE)

/// Block until `*addr != expected`, a wake arrives, or the timeout expires.
///
/// Returns the raw syscall result: 0 on wake, -1 with `errno` EAGAIN when
/// the value already differs, ETIMEDOUT on timeout.
#[cfg(target_os = "linux")]
pub fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Option<Duration>) -> i32 {
    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: libc::c_long::from(d.subsec_nanos()),
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(ptr::null(), |t| t as *const libc::timespec);

    // SAFETY: addr outlives the call (we hold a reference); the remaining
    // arguments are unused by FUTEX_WAIT.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAIT,
            expected,
            ts_ptr,
            ptr::null::<u32>(),
            0i32,
        ) as i32
    }
}

/// Wake up to `count` waiters blocked on `addr`.
#[cfg(target_os = "linux")]
pub fn futex_wake(addr: &AtomicU32, count: i32) -> i32 {
    // SAFETY: addr outlives the call; timeout and the remaining arguments
    // are unused by FUTEX_WAKE.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAKE,
            count,
            ptr::null::<libc::timespec>(),
            ptr::null::<u32>(),
            0i32,
        ) as i32
    }
}

/// Wake every waiter blocked on `addr`.
#[cfg(target_os = "linux")]
#[inline]
pub fn futex_wake_all(addr: &AtomicU32) -> i32 {
    futex_wake(addr, i32::MAX)
}

// Non-Linux fallback: degrade to short sleeps so tests still run.
#[cfg(not(target_os = "linux"))]
pub fn futex_wait(_addr: &AtomicU32, _expected: u32, timeout: Option<Duration>) -> i32 {
    let nap = timeout.unwrap_or(Duration::from_millis(1));
    std::thread::sleep(nap.min(Duration::from_millis(10)));
    0
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake(_addr: &AtomicU32, _count: i32) -> i32 {
    0
}

#[cfg(not(target_os = "linux"))]
#[inline]
pub fn futex_wake_all(_addr: &AtomicU32) -> i32 {
    0
}

/// A shared-memory event counter with futex blocking.
///
/// Lives inside a `#[repr(C)]` shared structure. Producers call
/// [`EventCell::signal`] after publishing their state change; consumers use
/// the snapshot / re-check / wait cycle:
///
/// ```ignore
/// loop {
///     if ready() { break; }
///     let seen = cell.snapshot();
///     if ready() { break; }          // close the race with a concurrent signal
///     cell.wait(seen, timeout);
/// }
/// ```
#[repr(C)]
pub struct EventCell {
    counter: AtomicU32,
}

impl EventCell {
    /// A cell with no events recorded. Zeroed shared memory is equivalent.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    /// Current event count. Acquire: pairs with the Release in `signal`.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    /// Publish an event and wake all waiters.
    #[inline]
    pub fn signal(&self) {
        self.counter.fetch_add(1, Ordering::Release);
        futex_wake_all(&self.counter);
    }

    /// Block while the counter still equals `seen`.
    ///
    /// Spurious returns are allowed; callers re-check their condition.
    #[inline]
    pub fn wait(&self, seen: u32, timeout: Option<Duration>) {
        futex_wait(&self.counter, seen, timeout);
    }
}

impl Default for EventCell {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared-memory counting semaphore.
///
/// Lives inside a `#[repr(C)]` shared structure; zeroed memory is a valid
/// empty semaphore.
#[repr(C)]
pub struct SemaphoreCell {
    count: AtomicU32,
}

impl SemaphoreCell {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    /// Raise the count by one and wake a single waiter.
    pub fn post(&self) {
        self.count.fetch_add(1, Ordering::Release);
        futex_wake(&self.count, 1);
    }

    /// Take one unit, blocking up to `timeout` (forever when `None`).
    ///
    /// Returns false when the timeout expired with the count still zero.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        loop {
            let mut count = self.count.load(Ordering::Acquire);
            while count > 0 {
                match self.count.compare_exchange_weak(
                    count,
                    count - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return true,
                    Err(actual) => count = actual,
                }
            }

            let remaining = match deadline {
                Some(d) => {
                    let now = std::time::Instant::now();
                    if now >= d {
                        return false;
                    }
                    Some(d - now)
                }
                None => None,
            };
            futex_wait(&self.count, 0, remaining);
        }
    }

    /// Wake every waiter without raising the count. Used on teardown so
    /// blocked waiters re-check their termination condition.
    pub fn interrupt_all(&self) {
        futex_wake_all(&self.count);
    }
}

impl Default for SemaphoreCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wake_without_waiters() {
        let cell = AtomicU32::new(0);
        assert!(futex_wake(&cell, 1) >= 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn wait_returns_on_value_mismatch() {
        let cell = AtomicU32::new(7);
        let rc = futex_wait(&cell, 0, Some(Duration::from_millis(100)));
        assert_eq!(rc, -1);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn wait_times_out() {
        let cell = AtomicU32::new(7);
        let start = std::time::Instant::now();
        futex_wait(&cell, 7, Some(Duration::from_millis(50)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn event_cell_wakes_peer_thread() {
        let cell = Arc::new(EventCell::new());
        let flag = Arc::new(AtomicU32::new(0));

        let waiter = {
            let cell = Arc::clone(&cell);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                loop {
                    if flag.load(Ordering::Acquire) == 1 {
                        break;
                    }
                    let seen = cell.snapshot();
                    if flag.load(Ordering::Acquire) == 1 {
                        break;
                    }
                    cell.wait(seen, Some(Duration::from_secs(1)));
                }
                flag.load(Ordering::Acquire)
            })
        };

        thread::sleep(Duration::from_millis(10));
        flag.store(1, Ordering::Release);
        cell.signal();

        assert_eq!(waiter.join().expect("waiter panicked"), 1);
    }
}
