//! Cancellable Timer Slot
//!
//! The round engine never sleeps. It arms a deadline here and the owning
//! task polls the slot when that deadline passes. A slot holds at most one
//! armed timer, so arming a new one cancels whatever was pending.

use std::time::{Duration, Instant};

/// What a timer is for. Returned from [`TimerSlot::poll`] when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// One-second countdown tick during Waiting.
    Countdown,
    /// Multiplier tick during Running.
    Progress,
    /// Delay between Crashed and the next Waiting phase.
    Cooldown,
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    kind: TimerKind,
    deadline: Instant,
    /// `Some` for repeating timers.
    period: Option<Duration>,
}

/// A single cancellable one-shot or repeating timer.
#[derive(Debug, Default)]
pub struct TimerSlot {
    armed: Option<ArmedTimer>,
    /// Bumped on every arm/cancel; lets callers detect supersession.
    generation: u64,
}

impl TimerSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot timer firing at `deadline`.
    pub fn schedule_once(&mut self, kind: TimerKind, deadline: Instant) {
        self.arm(ArmedTimer { kind, deadline, period: None });
    }

    /// Arm a repeating timer first firing at `start + period`.
    pub fn schedule_repeating(&mut self, kind: TimerKind, start: Instant, period: Duration) {
        // A zero period would fire forever within one poll loop.
        let period = period.max(Duration::from_millis(1));
        self.arm(ArmedTimer {
            kind,
            deadline: start + period,
            period: Some(period),
        });
    }

    fn arm(&mut self, timer: ArmedTimer) {
        self.generation = self.generation.wrapping_add(1);
        self.armed = Some(timer);
    }

    /// Cancel the pending timer. Returns the kind that was cancelled, if any.
    pub fn cancel(&mut self) -> Option<TimerKind> {
        let cancelled = self.armed.take().map(|t| t.kind);
        if cancelled.is_some() {
            self.generation = self.generation.wrapping_add(1);
        }
        cancelled
    }

    /// Deadline of the pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.map(|t| t.deadline)
    }

    /// Kind of the pending timer.
    pub fn pending(&self) -> Option<TimerKind> {
        self.armed.map(|t| t.kind)
    }

    /// Current arm/cancel generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fire the pending timer if its deadline is at or before `now`.
    ///
    /// One-shot timers are cleared. Repeating timers are re-armed for the
    /// first period boundary strictly after `now`; missed periods are skipped
    /// rather than fired in a burst.
    pub fn poll(&mut self, now: Instant) -> Option<TimerKind> {
        let timer = self.armed?;
        if timer.deadline > now {
            return None;
        }

        match timer.period {
            None => {
                self.armed = None;
            }
            Some(period) => {
                let mut next = timer.deadline + period;
                if next <= now {
                    let behind = now.duration_since(next);
                    let skipped = behind.as_nanos() / period.as_nanos() + 1;
                    next += period * u32::try_from(skipped).unwrap_or(u32::MAX);
                }
                self.armed = Some(ArmedTimer { deadline: next, ..timer });
            }
        }

        Some(timer.kind)
    }
}
