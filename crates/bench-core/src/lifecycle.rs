use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Warmup,
    Running,
    Cooldown,
    Complete,
}

/// Monotonic-clock phase machine for one run:
/// idle -> warmup (if any) -> running -> cooldown -> complete.
///
/// Cooldown begins when the run window has elapsed but workers are still
/// draining in-flight requests; `complete()` is forced by the orchestrator
/// during finalization.
#[derive(Debug)]
pub struct Lifecycle {
    warmup: Duration,
    duration: Duration,
    started: Option<Instant>,
    completed: bool,
}

impl Lifecycle {
    pub fn new(warmup: Duration, duration: Duration) -> Self {
        Self {
            warmup,
            duration,
            started: None,
            completed: false,
        }
    }

    pub fn start(&mut self) {
        self.started.get_or_insert_with(Instant::now);
    }

    pub fn complete(&mut self) {
        self.completed = true;
    }

    pub fn phase(&self) -> Phase {
        self.phase_at(Instant::now())
    }

    pub fn phase_at(&self, now: Instant) -> Phase {
        if self.completed {
            return Phase::Complete;
        }
        let Some(started) = self.started else {
            return Phase::Idle;
        };
        let elapsed = now.saturating_duration_since(started);
        if elapsed < self.warmup {
            Phase::Warmup
        } else if elapsed < self.warmup + self.duration {
            Phase::Running
        } else {
            Phase::Cooldown
        }
    }

    /// When workers should stop issuing new requests.
    pub fn soft_deadline(&self) -> Option<Instant> {
        self.started.map(|s| s + self.warmup + self.duration)
    }

    /// When the orchestrator gives up on unresponsive workers.
    pub fn hard_deadline(&self, request_timeout: Duration) -> Option<Instant> {
        self.soft_deadline().map(|d| d + 2 * request_timeout)
    }

    /// Fraction of the running phase already elapsed, in [0, 1].
    pub fn progress(&self) -> f64 {
        self.progress_at(Instant::now())
    }

    pub fn progress_at(&self, now: Instant) -> f64 {
        let Some(started) = self.started else {
            return 0.0;
        };
        if self.duration.is_zero() {
            return 1.0;
        }
        let into_run = now
            .saturating_duration_since(started)
            .saturating_sub(self.warmup);
        (into_run.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }
}
