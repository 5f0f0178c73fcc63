//! Closed-loop HTTP load generation engine.
//!
//! The orchestrator fans load across OS-thread workers, each driving a
//! keep-alive connection pool with a single-threaded cooperative loop.
//! Workers report per-second metrics snapshots over an MPSC channel; the
//! aggregator merges their fixed-memory latency histograms losslessly into
//! one distribution.

pub mod aggregator;
pub mod client;
pub mod config;
pub mod histogram;
pub mod lifecycle;
pub mod orchestrator;
pub mod rate_limiter;
pub mod request_loop;
pub mod result;
pub mod worker;

pub use aggregator::Aggregator;
pub use client::{HttpClient, RequestError, ResponseSample};
pub use config::{BenchConfig, WorkerPlan, MAX_WORKERS};
pub use histogram::LatencyHistogram;
pub use lifecycle::{Lifecycle, Phase};
pub use orchestrator::run_benchmark;
pub use rate_limiter::{RateLimiter, SharedRateLimiter};
pub use request_loop::{is_success_status, Recorder, SUCCESS_STATUSES};
pub use result::{BenchResult, ErrorTally, LatencyStats, Meta, RequestTotals, Throughput};
pub use worker::{
    spawn_worker, LatencyPayload, MetricsSnapshot, WorkerCommand, WorkerEvent, WorkerHandle,
};
