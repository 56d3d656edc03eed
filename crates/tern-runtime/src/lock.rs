//! Runtime mutex
//!
//! The lock everything else in the runtime is built on. The lock word has
//! three states and waiters spin actively, then yield the thread, then
//! sleep. Sleeping goes through a fixed table of wait buckets keyed by the
//! lock word's address, so a lock needs no allocation and no registration.
//!
//! # Rules
//!
//! - Not re-entrant: acquiring a lock the current thread holds is fatal
//! - Releasing a lock the current thread does not hold is fatal
//! - Each held lock counts against the current worker; yielding or exiting
//!   a task with a nonzero count is fatal

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::thread;

use parking_lot::{Condvar, Mutex as WaitLock};

use crate::fatal::{self, FatalError};
use crate::worker;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const SLEEPING: u32 = 2;

/// Spin rounds before yielding, on multiprocessors
pub const ACTIVE_SPIN: u32 = 4;
/// Busy-wait iterations per active spin round
pub const ACTIVE_SPIN_CNT: u32 = 30;
/// Thread yields before sleeping
pub const PASSIVE_SPIN: u32 = 1;

// ============================================================================
// Wait Table
// ============================================================================

const WAIT_BUCKETS: usize = 64;

struct Bucket {
    lock: WaitLock<()>,
    cv: Condvar,
}

impl Bucket {
    const fn new() -> Self {
        Self {
            lock: parking_lot::const_mutex(()),
            cv: Condvar::new(),
        }
    }
}

static WAIT_TABLE: [Bucket; WAIT_BUCKETS] = [const { Bucket::new() }; WAIT_BUCKETS];

fn bucket(key: &AtomicU32) -> &'static Bucket {
    let addr = key as *const AtomicU32 as usize;
    &WAIT_TABLE[(addr >> 3) % WAIT_BUCKETS]
}

/// Sleep while `*key == val`. May wake spuriously.
fn wait(key: &AtomicU32, val: u32) {
    let b = bucket(key);
    let mut guard = b.lock.lock();
    if key.load(Ordering::SeqCst) != val {
        return;
    }
    b.cv.wait(&mut guard);
}

/// Wake sleepers on `key`.
fn wake(key: &AtomicU32) {
    let b = bucket(key);
    let _guard = b.lock.lock();
    // Buckets are shared between keys
    b.cv.notify_all();
}

fn ncpu() -> usize {
    static NCPU: OnceLock<usize> = OnceLock::new();
    *NCPU.get_or_init(|| thread::available_parallelism().map_or(1, |n| n.get()))
}

// ============================================================================
// Raw Mutex
// ============================================================================

/// A lock word without data.
#[derive(Debug, Default)]
pub struct RawMutex {
    key: AtomicU32,
    /// Thread token of the holder; zero when unlocked
    owner: AtomicU64,
}

impl RawMutex {
    pub const fn new() -> Self {
        Self {
            key: AtomicU32::new(UNLOCKED),
            owner: AtomicU64::new(0),
        }
    }

    /// Acquire the lock, blocking the thread if needed.
    pub fn lock(&self) {
        let me = worker::thread_token();
        if self.owner.load(Ordering::Relaxed) == me {
            fatal::throw(FatalError::Reentrant);
        }
        worker::lock_acquired();

        // Speculative grab
        let v = self.key.swap(LOCKED, Ordering::Acquire);
        if v != UNLOCKED {
            self.lock_slow(v);
        }
        self.owner.store(me, Ordering::Relaxed);
    }

    #[cold]
    fn lock_slow(&self, prev: u32) {
        // We may have stolen a SLEEPING mark; whatever we store on acquire
        // must keep sleepers wakeable
        let mut wait_state = prev;
        let spin = if ncpu() > 1 { ACTIVE_SPIN } else { 0 };

        loop {
            for _ in 0..spin {
                if self.try_grab(wait_state) {
                    return;
                }
                for _ in 0..ACTIVE_SPIN_CNT {
                    core::hint::spin_loop();
                }
            }
            for _ in 0..PASSIVE_SPIN {
                if self.try_grab(wait_state) {
                    return;
                }
                thread::yield_now();
            }

            if self.key.swap(SLEEPING, Ordering::Acquire) == UNLOCKED {
                return;
            }
            wait_state = SLEEPING;
            wait(&self.key, SLEEPING);
        }
    }

    fn try_grab(&self, wait_state: u32) -> bool {
        while self.key.load(Ordering::Relaxed) == UNLOCKED {
            if self
                .key
                .compare_exchange(UNLOCKED, wait_state, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Try to acquire without waiting.
    pub fn try_lock(&self) -> bool {
        let me = worker::thread_token();
        if self.owner.load(Ordering::Relaxed) == me {
            fatal::throw(FatalError::Reentrant);
        }
        if self
            .key
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        worker::lock_acquired();
        self.owner.store(me, Ordering::Relaxed);
        true
    }

    /// Release the lock.
    pub fn unlock(&self) {
        if self.owner.load(Ordering::Relaxed) != worker::thread_token() {
            fatal::throw(FatalError::UnlockOfUnlocked);
        }
        self.owner.store(0, Ordering::Relaxed);

        let v = self.key.swap(UNLOCKED, Ordering::Release);
        if v == UNLOCKED {
            fatal::throw(FatalError::UnlockOfUnlocked);
        }
        if v == SLEEPING {
            wake(&self.key);
        }
        worker::lock_released();
    }

    /// Whether some thread holds the lock
    pub fn is_locked(&self) -> bool {
        self.key.load(Ordering::Relaxed) != UNLOCKED
    }
}

// ============================================================================
// Mutex<T>
// ============================================================================

/// Runtime mutex protecting a `T`.
#[derive(Debug, Default)]
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

// SAFETY: the lock serializes all access to `data`
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.raw.try_lock().then(|| MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }

    /// The underlying lock word
    pub fn raw(&self) -> &RawMutex {
        &self.raw
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Held lock. Released on drop, on the thread that took it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held, uniquely borrowed here
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}
