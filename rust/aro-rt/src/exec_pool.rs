//! The compiled-execution pool.
//!
//! Compiled handlers must hold one of a bounded number of slots while they
//! execute statements that may block. Capacity is `4 × cores`, so cascading
//! event chains cannot exhaust the host's threads.
//!
//! The pool implements the yield-while-blocked discipline: a thread that is
//! about to block on a completion signal releases its slot first and
//! re-acquires it afterwards. Without this, a saturated pool deadlocks as
//! soon as a blocking action publishes an event whose handlers need slots
//! of their own.
//!
//! Whether the current thread holds a slot is tracked thread-locally; the
//! semaphore itself is a mutex-guarded count with a condvar.

use std::cell::Cell;
use std::sync::{Arc, Condvar, Mutex};

thread_local! {
    static HOLDS_SLOT: Cell<bool> = const { Cell::new(false) };
}

/// A counting semaphore bounding concurrent compiled execution.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct CompiledExecPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    available: Mutex<usize>,
    freed: Condvar,
    capacity: usize,
}

impl Default for CompiledExecPool {
    fn default() -> Self {
        Self::with_capacity(4 * num_cpus::get())
    }
}

impl CompiledExecPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                available: Mutex::new(capacity),
                freed: Condvar::new(),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn available(&self) -> usize {
        *self.inner.available.lock().expect("pool lock")
    }

    /// Whether the calling thread currently holds a slot.
    pub fn holds_slot(&self) -> bool {
        HOLDS_SLOT.with(Cell::get)
    }

    /// Block until a slot is free and take it. Acquiring while already
    /// holding is a no-op, so a compiled function can wrap nested statement
    /// execution without double-counting.
    pub fn acquire(&self) {
        if self.holds_slot() {
            return;
        }
        let mut available = self.inner.available.lock().expect("pool lock");
        while *available == 0 {
            available = self.inner.freed.wait(available).expect("pool lock");
        }
        *available -= 1;
        HOLDS_SLOT.with(|flag| flag.set(true));
    }

    /// Give the slot back. Releasing without holding is a no-op.
    pub fn release(&self) {
        if !self.holds_slot() {
            return;
        }
        HOLDS_SLOT.with(|flag| flag.set(false));
        let mut available = self.inner.available.lock().expect("pool lock");
        *available += 1;
        self.inner.freed.notify_one();
    }

    /// Run `f` with this thread's slot released for the duration, then
    /// re-acquire. Threads that hold no slot just run `f`.
    pub fn yield_while_blocked<R>(&self, f: impl FnOnce() -> R) -> R {
        if !self.holds_slot() {
            return f();
        }
        self.release();
        let result = f();
        self.acquire();
        result
    }

    /// Run `f` while holding a slot, releasing it afterwards.
    pub fn with_slot<R>(&self, f: impl FnOnce() -> R) -> R {
        let already_held = self.holds_slot();
        if !already_held {
            self.acquire();
        }
        let result = f();
        if !already_held {
            self.release();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn default_capacity_scales_with_cores() {
        let pool = CompiledExecPool::new();
        assert_eq!(pool.capacity(), 4 * num_cpus::get());
        assert_eq!(pool.available(), pool.capacity());
    }

    #[test]
    fn acquire_and_release_round_trip() {
        let pool = CompiledExecPool::with_capacity(2);
        pool.acquire();
        assert!(pool.holds_slot());
        assert_eq!(pool.available(), 1);
        pool.release();
        assert!(!pool.holds_slot());
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn nested_acquire_does_not_double_count() {
        let pool = CompiledExecPool::with_capacity(1);
        pool.acquire();
        pool.acquire();
        assert_eq!(pool.available(), 0);
        pool.release();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn yield_while_blocked_frees_the_slot_for_others() {
        let pool = CompiledExecPool::with_capacity(1);
        let observed = Arc::new(AtomicUsize::new(0));

        pool.acquire();
        let other = {
            let pool = pool.clone();
            let observed = Arc::clone(&observed);
            thread::spawn(move || {
                pool.with_slot(|| {
                    observed.fetch_add(1, Ordering::SeqCst);
                });
            })
        };

        // While we block, the only slot is released, so the other thread
        // can make progress; without the yield this would deadlock.
        pool.yield_while_blocked(|| {
            while observed.load(Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        });
        other.join().unwrap();
        assert!(pool.holds_slot());
        pool.release();
    }

    #[test]
    fn saturation_blocks_until_release() {
        let pool = CompiledExecPool::with_capacity(1);
        let entered = Arc::new(AtomicUsize::new(0));
        pool.acquire();

        let waiter = {
            let pool = pool.clone();
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                pool.with_slot(|| {
                    entered.fetch_add(1, Ordering::SeqCst);
                });
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert_eq!(entered.load(Ordering::SeqCst), 0);
        pool.release();
        waiter.join().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }
}
