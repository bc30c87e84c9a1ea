//! Progress clock and the repeating-timer abstraction behind it.
//!
//! Timers are requested from a [`Scheduler`] and fire as
//! [`EngineEvent::Timer`](crate::EngineEvent::Timer) messages on the
//! session's event channel. Tests use [`ManualScheduler`] and fire timers
//! by hand, so no wall-clock time is involved.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::trace;

/// Identifies one repeating timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Creates and cancels repeating timers.
pub trait Scheduler: Send + Sync {
    /// Fire a timer every `period` until cancelled. The first firing is one
    /// period from now.
    fn schedule_repeating(&self, period: Duration) -> TimerId;

    /// Stop a timer. Unknown or already-cancelled ids are ignored.
    fn cancel(&self, timer: TimerId);
}

/// A [`Scheduler`] that never fires on its own.
///
/// It records which timers are active; the owner decides when they fire.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    active: Mutex<BTreeMap<TimerId, Duration>>,
}

impl ManualScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Active timers and their periods, oldest first.
    pub fn active(&self) -> Vec<(TimerId, Duration)> {
        self.lock().iter().map(|(id, period)| (*id, *period)).collect()
    }

    /// Whether `timer` is still scheduled.
    pub fn is_active(&self, timer: TimerId) -> bool {
        self.lock().contains_key(&timer)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<TimerId, Duration>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&self, period: Duration) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().insert(id, period);
        id
    }

    fn cancel(&self, timer: TimerId) {
        self.lock().remove(&timer);
    }
}

/// Tracks elapsed narration time while playing.
///
/// The clock owns at most one timer. It is cancelled, not paused, when
/// playback pauses, and a fresh one is scheduled on resume. Elapsed time is
/// clamped to the total and never moves backwards until [`reset`](Self::reset).
pub struct ProgressClock {
    scheduler: Arc<dyn Scheduler>,
    cadence: Duration,
    timer: Option<TimerId>,
    elapsed: Duration,
    total: Duration,
}

impl fmt::Debug for ProgressClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressClock")
            .field("cadence", &self.cadence)
            .field("timer", &self.timer)
            .field("elapsed", &self.elapsed)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

impl ProgressClock {
    /// Create a stopped clock with a zero total.
    pub fn new(scheduler: Arc<dyn Scheduler>, cadence: Duration) -> Self {
        Self {
            scheduler,
            cadence,
            timer: None,
            elapsed: Duration::ZERO,
            total: Duration::ZERO,
        }
    }

    /// Cancel the timer, zero elapsed time and set a new total.
    pub fn reset(&mut self, total: Duration) {
        self.cancel();
        self.elapsed = Duration::ZERO;
        self.total = total;
    }

    /// Zero elapsed time, keeping the total.
    pub fn rewind(&mut self) {
        let total = self.total;
        self.reset(total);
    }

    /// Schedule a fresh timer unless one is running or the run is complete.
    pub fn start(&mut self) {
        if self.timer.is_some() || self.elapsed >= self.total {
            return;
        }
        let timer = self.scheduler.schedule_repeating(self.cadence);
        trace!(%timer, cadence_ms = self.cadence.as_millis() as u64, "Progress clock started");
        self.timer = Some(timer);
    }

    /// Cancel the timer, keeping elapsed time.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.scheduler.cancel(timer);
            trace!(%timer, "Progress clock cancelled");
        }
    }

    /// Whether a timer is scheduled.
    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Whether `timer` belongs to this clock.
    pub fn owns(&self, timer: TimerId) -> bool {
        self.timer == Some(timer)
    }

    /// Add one cadence step (estimated progress).
    pub fn advance(&mut self) -> Duration {
        let candidate = self.elapsed.saturating_add(self.cadence);
        self.settle(candidate)
    }

    /// Take the engine's reported position (ground-truth progress).
    pub fn observe(&mut self, position: Duration) -> Duration {
        self.settle(position)
    }

    fn settle(&mut self, candidate: Duration) -> Duration {
        self.elapsed = candidate.min(self.total).max(self.elapsed);
        if self.elapsed >= self.total {
            self.cancel();
        }
        self.elapsed
    }

    /// Elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Total time.
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Tick period.
    pub fn cadence(&self) -> Duration {
        self.cadence
    }
}
