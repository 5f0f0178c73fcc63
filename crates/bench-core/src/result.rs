use crate::aggregator::Aggregator;
use crate::config::BenchConfig;
use crate::histogram::LatencyHistogram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Final benchmark record: the stable contract consumed by reporters and CI
/// pipelines. Field names in the JSON encoding are fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchResult {
    pub url: String,
    pub method: String,
    /// Configured run duration in seconds.
    pub duration: u64,
    pub connections: u32,
    pub rate: Option<u32>,
    pub requests: RequestTotals,
    pub throughput: Throughput,
    pub latency: LatencyStats,
    pub errors: ErrorTally,
    /// ISO-8601 UTC.
    pub timestamp: String,
    pub meta: Meta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTotals {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub rps: f64,
    #[serde(rename = "bytesPerSecond")]
    pub bytes_per_second: f64,
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
}

/// Latency summary in milliseconds, rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
}

impl LatencyStats {
    pub fn from_histogram(hist: &LatencyHistogram) -> Self {
        let ms = |us: f64| round2(us / 1_000.0);
        Self {
            min: ms(hist.min_us() as f64),
            max: ms(hist.max_us() as f64),
            mean: ms(hist.mean_us()),
            stddev: ms(hist.stddev_us()),
            p50: ms(hist.percentile_us(50.0)),
            p75: ms(hist.percentile_us(75.0)),
            p90: ms(hist.percentile_us(90.0)),
            p95: ms(hist.percentile_us(95.0)),
            p99: ms(hist.percentile_us(99.0)),
            p999: ms(hist.percentile_us(99.9)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTally {
    pub timeouts: u64,
    #[serde(rename = "connectionErrors")]
    pub connection_errors: u64,
    /// Failure counts keyed by numeric status code as a string.
    #[serde(rename = "byStatusCode")]
    pub by_status_code: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub version: String,
    /// Runtime identifier; the key name is retained for compatibility with
    /// consumers of the original record shape.
    #[serde(rename = "nodeVersion")]
    pub node_version: String,
    pub platform: String,
}

impl BenchResult {
    /// Assemble the record from the run configuration, the folded aggregate
    /// state and the measured wall-clock duration.
    pub fn assemble(config: &BenchConfig, aggregator: &Aggregator, wall: Duration) -> Self {
        let wall_secs = wall.as_secs_f64().max(f64::EPSILON);
        let by_status_code = aggregator
            .by_status
            .iter()
            .map(|(&status, &count)| (status.to_string(), count))
            .collect();

        Self {
            url: config.url.clone(),
            method: config.method.to_string(),
            duration: config.duration.as_secs(),
            connections: config.connections,
            rate: config.rate,
            requests: RequestTotals {
                total: aggregator.requests,
                successful: aggregator.successes,
                failed: aggregator.failures,
            },
            throughput: Throughput {
                rps: round2(aggregator.requests as f64 / wall_secs),
                bytes_per_second: round2(aggregator.bytes as f64 / wall_secs),
                total_bytes: aggregator.bytes,
            },
            latency: LatencyStats::from_histogram(aggregator.histogram()),
            errors: ErrorTally {
                timeouts: aggregator.timeouts,
                connection_errors: aggregator.connection_errors,
                by_status_code,
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
            meta: Meta {
                version: env!("CARGO_PKG_VERSION").to_string(),
                node_version: "rust".to_string(),
                platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            },
        }
    }

    /// Fraction of requests that failed, zero for an empty run.
    pub fn error_fraction(&self) -> f64 {
        if self.requests.total == 0 {
            0.0
        } else {
            self.requests.failed as f64 / self.requests.total as f64
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
