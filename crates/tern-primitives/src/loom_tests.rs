//! Loom models of the runtime's atomic protocols
//!
//! Loom explores every interleaving of a small concurrent program. The
//! models here replicate, with loom's atomics, the protocols the runtime
//! builds on:
//!
//! - pointer CAS (`atomic::cas_pointer`)
//! - publish with a release fence, follow with an acquire load
//! - the runtime mutex's three-state lock word and its sleep/wake handoff
//! - syscall exit racing a retake for the same task
//!
//! # Running Loom Tests
//!
//! ```bash
//! cargo test --package tern-primitives --features loom -- --test-threads=1 loom
//! ```

#[cfg(all(test, feature = "loom"))]
mod tests {
    use loom::cell::UnsafeCell;
    use loom::sync::atomic::{fence, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};
    use loom::sync::{Arc, Condvar, Mutex};
    use loom::thread;

    /// Exactly one of two racing CASes from the same expected value wins.
    #[test]
    fn loom_cas_single_winner() {
        loom::model(|| {
            let slot = Arc::new(AtomicUsize::new(0));

            let s1 = slot.clone();
            let s2 = slot.clone();
            let t1 = thread::spawn(move || {
                s1.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            });
            let t2 = thread::spawn(move || {
                s2.compare_exchange(0, 2, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            });

            let w1 = t1.join().unwrap();
            let w2 = t2.join().unwrap();
            assert!(w1 ^ w2, "exactly one CAS must win");

            let v = slot.load(Ordering::SeqCst);
            assert_eq!(v, if w1 { 1 } else { 2 });
        });
    }

    /// A reader that sees the published pointer sees the initialized object.
    #[test]
    fn loom_publication_barrier() {
        loom::model(|| {
            let slot = Arc::new(AtomicPtr::<AtomicU64>::new(core::ptr::null_mut()));
            let obj = Arc::new(AtomicU64::new(0));

            let writer_slot = slot.clone();
            let writer_obj = obj.clone();
            let writer = thread::spawn(move || {
                writer_obj.store(42, Ordering::Relaxed);
                fence(Ordering::Release);
                let p = Arc::as_ptr(&writer_obj) as *mut AtomicU64;
                writer_slot.store(p, Ordering::Relaxed);
            });

            let p = slot.load(Ordering::Acquire);
            if !p.is_null() {
                // SAFETY: `obj` keeps the target alive for the whole model run
                let seen = unsafe { (*p).load(Ordering::Relaxed) };
                assert_eq!(seen, 42, "published object observed uninitialized");
            }

            writer.join().unwrap();
        });
    }

    const UNLOCKED: u32 = 0;
    const LOCKED: u32 = 1;
    const SLEEPING: u32 = 2;

    /// The runtime mutex: lock word plus one wait bucket. Spinning is left
    /// out; a contended acquire makes one grab attempt per round and then
    /// goes to sleep.
    struct LoomMutex {
        key: AtomicU32,
        bucket: Mutex<()>,
        cv: Condvar,
        data: UnsafeCell<u32>,
    }

    // SAFETY: `data` is only touched between `lock` and `unlock`
    unsafe impl Sync for LoomMutex {}

    impl LoomMutex {
        fn new() -> Self {
            Self {
                key: AtomicU32::new(UNLOCKED),
                bucket: Mutex::new(()),
                cv: Condvar::new(),
                data: UnsafeCell::new(0),
            }
        }

        fn lock(&self) {
            let v = self.key.swap(LOCKED, Ordering::Acquire);
            if v == UNLOCKED {
                return;
            }
            // A stolen SLEEPING mark must survive our acquisition
            let mut wait_state = v;
            loop {
                if self
                    .key
                    .compare_exchange(UNLOCKED, wait_state, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                if self.key.swap(SLEEPING, Ordering::Acquire) == UNLOCKED {
                    return;
                }
                wait_state = SLEEPING;
                self.wait(SLEEPING);
            }
        }

        fn wait(&self, val: u32) {
            let guard = self.bucket.lock().unwrap();
            if self.key.load(Ordering::SeqCst) != val {
                return;
            }
            drop(self.cv.wait(guard).unwrap());
        }

        fn unlock(&self) {
            let prev = self.key.swap(UNLOCKED, Ordering::Release);
            assert_ne!(prev, UNLOCKED, "unlock of unlocked lock");
            if prev == SLEEPING {
                let _guard = self.bucket.lock().unwrap();
                self.cv.notify_all();
            }
        }

        fn increment(&self) {
            self.lock();
            self.data.with_mut(|p| unsafe { *p += 1 });
            self.unlock();
        }
    }

    /// Three lockers never overlap inside the critical section, and every
    /// one of them gets through.
    #[test]
    fn loom_mutex_mutual_exclusion() {
        let mut builder = loom::model::Builder::new();
        builder.preemption_bound = Some(3);
        builder.check(|| {
            let lock = Arc::new(LoomMutex::new());

            let handles: std::vec::Vec<_> = (0..2)
                .map(|_| {
                    let lock = lock.clone();
                    thread::spawn(move || lock.increment())
                })
                .collect();
            lock.increment();
            for h in handles {
                h.join().unwrap();
            }

            let total = lock.data.with(|p| unsafe { *p });
            assert_eq!(total, 3);
            assert_eq!(lock.key.load(Ordering::SeqCst), UNLOCKED);
        });
    }

    /// A waiter that marks the word SLEEPING is always woken by the unlock.
    /// A lost wakeup leaves the waiter blocked, which loom reports as a
    /// deadlock.
    #[test]
    fn loom_mutex_unlock_wakes_sleeper() {
        loom::model(|| {
            let lock = Arc::new(LoomMutex::new());
            lock.lock();

            let waiter = {
                let lock = lock.clone();
                thread::spawn(move || lock.increment())
            };
            lock.data.with_mut(|p| unsafe { *p = 10 });
            lock.unlock();
            waiter.join().unwrap();

            assert_eq!(lock.data.with(|p| unsafe { *p }), 11);
        });
    }

    /// Syscall exit and retake race on the worker's syscall-task word.
    /// Exactly one side claims the task.
    #[test]
    fn loom_syscall_exit_vs_retake() {
        loom::model(|| {
            const TASK: u64 = 7;
            let syscall_task = Arc::new(AtomicU64::new(TASK));

            let retaker = syscall_task.clone();
            let t = thread::spawn(move || {
                retaker
                    .compare_exchange(TASK, 0, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            });
            let exited_fast = syscall_task
                .compare_exchange(TASK, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            let retaken = t.join().unwrap();

            assert!(exited_fast ^ retaken, "task claimed twice or not at all");
            assert_eq!(syscall_task.load(Ordering::SeqCst), 0);
        });
    }
}

// ============================================================================
// Documentation-only module for non-loom builds
// ============================================================================

#[cfg(not(feature = "loom"))]
/// Loom tests are only available with the `loom` feature.
///
/// To run loom tests:
/// ```bash
/// cargo test --package tern-primitives --features loom -- --test-threads=1 loom
/// ```
pub mod _loom_docs {}
