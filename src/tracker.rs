//! Read and write accumulators
//!
//! [`DualTracker`] owns two independent [`Accumulator`]s. Each sits behind its
//! own mutex, so reads and writes arriving from different guest threads never
//! contend with each other, while updates to the same accumulator are
//! serialized. A shutdown latch turns every update after shutdown into a
//! counted drop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::accumulator::Accumulator;
use crate::context::ExecutionContext;

/// Class of a memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    /// Classify from a host `is_write` flag
    pub fn from_is_write(is_write: bool) -> Self {
        if is_write {
            AccessKind::Write
        } else {
            AccessKind::Read
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
        }
    }
}

/// Independent read and write accumulators with a shutdown latch
#[derive(Debug, Default)]
pub struct DualTracker {
    reads: Mutex<Accumulator>,
    writes: Mutex<Accumulator>,
    shut_down: AtomicBool,
    dropped_events: AtomicU64,
}

impl DualTracker {
    /// Create a tracker with two empty accumulators
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `buffer` against the accumulator for `kind`
    ///
    /// Returns `false` if the event was dropped because shutdown had begun.
    pub fn record(&self, kind: AccessKind, context: ExecutionContext, buffer: &[u8]) -> bool {
        // Checked under the lock so nothing lands after a flush has taken it.
        let mut accumulator = self.lock(kind);
        if self.shut_down.load(Ordering::Acquire) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        accumulator.update_range(context, buffer);
        true
    }

    /// Lock the accumulator for `kind`
    ///
    /// Poisoned locks are recovered; an accumulator is consistent between
    /// any two counter bumps.
    pub fn lock(&self, kind: AccessKind) -> MutexGuard<'_, Accumulator> {
        let slot = match kind {
            AccessKind::Read => &self.reads,
            AccessKind::Write => &self.writes,
        };
        slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Close the latch
    ///
    /// Returns `true` only for the first caller; later calls observe that
    /// shutdown already began.
    pub fn begin_shutdown(&self) -> bool {
        self.shut_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether shutdown has begun
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Events rejected after shutdown
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}
