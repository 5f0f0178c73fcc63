use anyhow::{bail, Context, Result};
use reqwest::Method;
use std::time::Duration;

/// Upper bound on parallel worker threads regardless of CPU count.
pub const MAX_WORKERS: usize = 8;

pub const DEFAULT_CONNECTIONS: u32 = 50;
pub const DEFAULT_DURATION_SECS: u64 = 10;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Immutable description of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub url: String,
    pub method: Method,
    /// Header name/value pairs, emitted case-insensitively.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Set `Content-Type: application/json` on every request.
    pub json_body: bool,
    /// Aggregate concurrency across all workers.
    pub connections: u32,
    pub duration: Duration,
    /// Aggregate request rate cap; `None` means closed-loop only.
    pub rate: Option<u32>,
    /// Per-request timeout covering headers and body.
    pub timeout: Duration,
    pub warmup: Duration,
    pub ramp_up: Duration,
    pub http2: bool,
}

impl BenchConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            json_body: false,
            connections: DEFAULT_CONNECTIONS,
            duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            rate: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            warmup: Duration::ZERO,
            ramp_up: Duration::ZERO,
            http2: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.url)
            .with_context(|| format!("invalid target URL: {}", self.url))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => bail!("unsupported URL scheme '{other}' (expected http or https)"),
        }
        if parsed.host_str().is_none() {
            bail!("target URL has no host: {}", self.url);
        }
        if self.connections < 1 {
            bail!("connections must be >= 1");
        }
        if self.duration.is_zero() {
            bail!("duration must be > 0");
        }
        if self.timeout.is_zero() {
            bail!("timeout must be > 0");
        }
        if self.rate == Some(0) {
            bail!("rate must be > 0 when set");
        }
        Ok(())
    }

    /// Number of worker threads: bounded by `MAX_WORKERS`, the CPU count and
    /// the requested concurrency (a worker with zero connections is useless).
    pub fn worker_count(&self) -> usize {
        MAX_WORKERS
            .min(num_cpus::get().max(1))
            .min(self.connections as usize)
            .max(1)
    }

    /// Split the aggregate connection and rate budgets across workers.
    ///
    /// Shares use ceil division, so the total may exceed the request by up to
    /// N-1. That guarantees at least the configured aggregate.
    pub fn worker_plans(&self) -> Vec<WorkerPlan> {
        let n = self.worker_count() as u32;
        let connections = self.connections.div_ceil(n);
        let rate = self.rate.map(|r| r.div_ceil(n).max(1));
        (0..n as usize)
            .map(|id| WorkerPlan {
                id,
                connections,
                rate,
                bench: self.clone(),
            })
            .collect()
    }

}

/// Per-worker slice of the benchmark: its id and its share of the
/// connection/rate budgets. Everything else is inherited.
#[derive(Debug, Clone)]
pub struct WorkerPlan {
    pub id: usize,
    pub connections: u32,
    pub rate: Option<u32>,
    pub bench: BenchConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = BenchConfig::new("http://127.0.0.1:8080");
        assert_eq!(cfg.connections, 50);
        assert_eq!(cfg.duration, Duration::from_secs(10));
        assert_eq!(cfg.timeout, Duration::from_millis(5000));
        assert_eq!(cfg.method, Method::GET);
        assert_eq!(cfg.warmup, Duration::ZERO);
        assert!(cfg.rate.is_none());
        assert!(!cfg.http2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_input() {
        let mut cfg = BenchConfig::new("not a url");
        assert!(cfg.validate().is_err());

        cfg = BenchConfig::new("ftp://example.com");
        assert!(cfg.validate().is_err());

        cfg = BenchConfig::new("http://example.com");
        cfg.connections = 0;
        assert!(cfg.validate().is_err());

        cfg = BenchConfig::new("http://example.com");
        cfg.duration = Duration::ZERO;
        assert!(cfg.validate().is_err());

        cfg = BenchConfig::new("http://example.com");
        cfg.rate = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn worker_count_is_clamped_by_connections() {
        let mut cfg = BenchConfig::new("http://example.com");
        cfg.connections = 3;
        assert!(cfg.worker_count() <= 3);
        assert!(cfg.worker_count() >= 1);

        cfg.connections = 1000;
        assert!(cfg.worker_count() <= MAX_WORKERS);
    }

    #[test]
    fn plans_split_connections_with_ceil_division() {
        let mut cfg = BenchConfig::new("http://example.com");
        cfg.connections = 50;
        let plans = cfg.worker_plans();
        let n = plans.len() as u32;

        let total: u32 = plans.iter().map(|p| p.connections).sum();
        assert!(total >= 50);
        assert!(total < 50 + n);
        for (idx, plan) in plans.iter().enumerate() {
            assert_eq!(plan.id, idx);
            assert_eq!(plan.connections, 50u32.div_ceil(n));
        }
    }

    #[test]
    fn plans_split_rate_and_keep_it_positive() {
        let mut cfg = BenchConfig::new("http://example.com");
        cfg.connections = 50;
        cfg.rate = Some(500);
        let plans = cfg.worker_plans();
        let n = plans.len() as u32;

        let total: u32 = plans.iter().map(|p| p.rate.unwrap()).sum();
        assert!(total >= 500);
        assert!(total < 500 + n);

        cfg.rate = Some(1);
        for plan in cfg.worker_plans() {
            assert!(plan.rate.unwrap() >= 1);
        }
    }

    #[test]
    fn single_connection_gets_single_worker() {
        let mut cfg = BenchConfig::new("http://example.com");
        cfg.connections = 1;
        let plans = cfg.worker_plans();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].connections, 1);
    }
}
