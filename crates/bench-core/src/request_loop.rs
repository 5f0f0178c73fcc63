use crate::client::{HttpClient, RequestError, ResponseSample};
use crate::histogram::LatencyHistogram;
use crate::rate_limiter::SharedRateLimiter;
use crate::worker::{LatencyPayload, MetricsSnapshot};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Status codes counted as successful responses. Everything else that
/// arrives intact is a failure, tallied per status code.
pub const SUCCESS_STATUSES: [u16; 7] = [200, 201, 202, 204, 301, 302, 304];

#[inline]
pub fn is_success_status(status: u16) -> bool {
    SUCCESS_STATUSES.contains(&status)
}

/// Worker-local state shared by all of its connection tasks. The worker
/// runtime is single-threaded, so interior mutability needs no locks.
pub(crate) struct LoopCtx {
    pub recorder: RefCell<Recorder>,
    pub limiter: Option<SharedRateLimiter>,
    pub stop: Cell<bool>,
    pub deadline: Instant,
}

/// Accumulates completed requests since the previous snapshot.
pub struct Recorder {
    requests: u64,
    successes: u64,
    failures: u64,
    bytes: u64,
    timeouts: u64,
    connection_errors: u64,
    by_status: BTreeMap<u16, u64>,
    hist: LatencyHistogram,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            requests: 0,
            successes: 0,
            failures: 0,
            bytes: 0,
            timeouts: 0,
            connection_errors: 0,
            by_status: BTreeMap::new(),
            hist: LatencyHistogram::new(),
        }
    }

    /// A response arrived intact: latency always counts, success depends on
    /// the status code.
    pub fn record_response(&mut self, sample: &ResponseSample) {
        self.requests += 1;
        self.bytes += sample.body_bytes;
        self.hist.record(sample.latency_us);
        if is_success_status(sample.status) {
            self.successes += 1;
        } else {
            self.failures += 1;
            *self.by_status.entry(sample.status).or_insert(0) += 1;
        }
    }

    /// Transport failure: no latency sample, classified into exactly one
    /// error counter so the failure tally stays exact.
    pub fn record_error(&mut self, err: &RequestError) {
        self.requests += 1;
        self.failures += 1;
        match err {
            RequestError::Timeout => self.timeouts += 1,
            RequestError::Connect(_) | RequestError::Protocol(_) => self.connection_errors += 1,
        }
    }

    /// Drain everything recorded since the last call into a snapshot delta.
    pub fn take_snapshot(&mut self, worker_id: usize) -> MetricsSnapshot {
        let drained = std::mem::replace(self, Recorder::new());
        MetricsSnapshot {
            worker_id,
            requests: drained.requests,
            successes: drained.successes,
            failures: drained.failures,
            bytes: drained.bytes,
            timeouts: drained.timeouts,
            connection_errors: drained.connection_errors,
            by_status: drained.by_status,
            latency: LatencyPayload::Delta(drained.hist),
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Closed-loop driver for one connection: acquire a token (if limited),
/// issue the request, record the outcome. Stop and deadline are checked at
/// every quiescence point; in-flight requests are never aborted.
pub(crate) async fn run_connection(
    ctx: Rc<LoopCtx>,
    client: Rc<HttpClient>,
    start_delay: Duration,
) {
    if !start_delay.is_zero() {
        sleep(start_delay).await;
    }
    loop {
        if ctx.stop.get() || Instant::now() >= ctx.deadline {
            break;
        }
        if let Some(limiter) = &ctx.limiter {
            limiter.acquire().await;
            // The token wait may have crossed the deadline.
            if ctx.stop.get() || Instant::now() >= ctx.deadline {
                break;
            }
        }
        match client.execute().await {
            Ok(sample) => ctx.recorder.borrow_mut().record_response(&sample),
            Err(err) => ctx.recorder.borrow_mut().record_error(&err),
        }
    }
}

/// Linear rate interpolation for the ramp-up window, never below one token
/// per second so the loop can make progress from t=0.
pub(crate) fn ramp_rate_at(target: u64, elapsed: Duration, ramp: Duration) -> u64 {
    if elapsed >= ramp {
        return target;
    }
    let scaled = (target as u128 * elapsed.as_millis()) / ramp.as_millis().max(1);
    (scaled as u64).clamp(1, target)
}

/// Keeps the shared limiter tracking the linear 0 -> target schedule, then
/// pins the final rate and exits.
pub(crate) async fn run_rate_ramp(limiter: SharedRateLimiter, target: u64, ramp: Duration) {
    const STEP: Duration = Duration::from_millis(100);
    let started = Instant::now();
    loop {
        let elapsed = started.elapsed();
        if elapsed >= ramp {
            limiter.set_rate(target);
            return;
        }
        limiter.set_rate(ramp_rate_at(target, elapsed, ramp));
        sleep(STEP).await;
    }
}

/// First-request delay for connection task `k`, spreading task starts across
/// the ramp window for a linear concurrency ramp.
pub(crate) fn stagger_delay(ramp: Duration, task_idx: u32, connections: u32) -> Duration {
    if ramp.is_zero() || connections <= 1 {
        return Duration::ZERO;
    }
    ramp * task_idx / connections
}
