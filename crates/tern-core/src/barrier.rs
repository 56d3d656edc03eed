//! Process-wide write-barrier state
//!
//! The collector owns this state and flips it at phase transitions. The
//! runtime only reads it, and it reaches the runtime by reference (through
//! the host) rather than as a hidden global, so tests can pin any phase.
//!
//! # Invariant
//!
//! `enabled == needed || cgo` after every collector update. Barrier-emitting
//! write paths test `enabled` alone.

use core::sync::atomic::{AtomicBool, Ordering};
use serde::{Deserialize, Serialize};

/// Collector phase as far as write barriers are concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcPhase {
    /// No collection in progress
    Off,
    /// Concurrent marking; barriers required
    Mark,
    /// Final marking; barriers still required
    MarkTermination,
}

impl GcPhase {
    /// Whether pointer writes need a barrier in this phase
    pub fn needs_barrier(self) -> bool {
        !matches!(self, GcPhase::Off)
    }
}

/// Write-barrier flags.
#[derive(Debug, Default)]
pub struct WriteBarrierState {
    enabled: AtomicBool,
    needed: AtomicBool,
    cgo: AtomicBool,
}

/// Plain copy of the flags at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierFlags {
    pub enabled: bool,
    pub needed: bool,
    pub cgo: bool,
}

impl WriteBarrierState {
    /// All barriers off.
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            needed: AtomicBool::new(false),
            cgo: AtomicBool::new(false),
        }
    }

    /// The gate checked before every barrier-aware pointer write.
    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Whether the current collector phase needs barriers
    pub fn needed(&self) -> bool {
        self.needed.load(Ordering::Acquire)
    }

    /// Whether foreign-call boundaries need barrier checks
    pub fn cgo(&self) -> bool {
        self.cgo.load(Ordering::Acquire)
    }

    /// Read all three flags.
    pub fn flags(&self) -> BarrierFlags {
        BarrierFlags {
            enabled: self.enabled(),
            needed: self.needed(),
            cgo: self.cgo(),
        }
    }

    // ========================================================================
    // Collector-side mutation
    // ========================================================================

    /// Collector: set whether the current phase needs barriers.
    pub fn set_needed(&self, needed: bool) {
        self.needed.store(needed, Ordering::Release);
        self.recompute();
    }

    /// Collector: set whether foreign-call checks need barriers.
    pub fn set_cgo(&self, cgo: bool) {
        self.cgo.store(cgo, Ordering::Release);
        self.recompute();
    }

    /// Collector: move to `phase`.
    pub fn set_phase(&self, phase: GcPhase) {
        self.set_needed(phase.needs_barrier());
    }

    fn recompute(&self) {
        let enabled = self.needed.load(Ordering::Acquire) || self.cgo.load(Ordering::Acquire);
        self.enabled.store(enabled, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_disabled() {
        let wb = WriteBarrierState::new();
        assert_eq!(wb.flags(), BarrierFlags::default());
    }

    #[test]
    fn test_phase_cycle() {
        let wb = WriteBarrierState::new();
        wb.set_phase(GcPhase::Mark);
        assert!(wb.enabled());
        assert!(wb.needed());
        wb.set_phase(GcPhase::MarkTermination);
        assert!(wb.enabled());
        wb.set_phase(GcPhase::Off);
        assert!(!wb.enabled());
        assert!(!wb.needed());
    }

    #[test]
    fn test_cgo_keeps_barrier_enabled_when_idle() {
        let wb = WriteBarrierState::new();
        wb.set_cgo(true);
        assert!(wb.enabled());
        assert!(!wb.needed());
        wb.set_phase(GcPhase::Mark);
        wb.set_phase(GcPhase::Off);
        assert!(wb.enabled(), "cgo check still needs the barrier");
        wb.set_cgo(false);
        assert!(!wb.enabled());
    }
}
