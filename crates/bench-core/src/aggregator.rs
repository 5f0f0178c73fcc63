use crate::histogram::LatencyHistogram;
use crate::worker::{LatencyPayload, MetricsSnapshot};
use anyhow::Result;
use std::collections::BTreeMap;

/// Folds worker snapshots into a master histogram and running totals.
///
/// Every operation here (histogram merge, counter addition, map union) is
/// commutative and associative, so snapshot arrival order across workers
/// does not affect the final result.
pub struct Aggregator {
    hist: LatencyHistogram,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub bytes: u64,
    pub timeouts: u64,
    pub connection_errors: u64,
    pub by_status: BTreeMap<u16, u64>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            hist: LatencyHistogram::new(),
            requests: 0,
            successes: 0,
            failures: 0,
            bytes: 0,
            timeouts: 0,
            connection_errors: 0,
            by_status: BTreeMap::new(),
        }
    }

    pub fn fold(&mut self, snapshot: &MetricsSnapshot) -> Result<()> {
        self.requests += snapshot.requests;
        self.successes += snapshot.successes;
        self.failures += snapshot.failures;
        self.bytes += snapshot.bytes;
        self.timeouts += snapshot.timeouts;
        self.connection_errors += snapshot.connection_errors;
        for (&status, &count) in &snapshot.by_status {
            *self.by_status.entry(status).or_insert(0) += count;
        }
        match &snapshot.latency {
            LatencyPayload::Delta(delta) => self.hist.merge(delta)?,
            LatencyPayload::Raw(samples) => {
                for &sample in samples {
                    self.hist.record(sample);
                }
            }
        }
        Ok(())
    }

    pub fn histogram(&self) -> &LatencyHistogram {
        &self.hist
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(worker_id: usize, latencies_us: &[u64], status_failures: &[u16]) -> MetricsSnapshot {
        let mut hist = LatencyHistogram::new();
        for &l in latencies_us {
            hist.record(l);
        }
        let mut by_status = BTreeMap::new();
        for &s in status_failures {
            *by_status.entry(s).or_insert(0) += 1;
        }
        let failures = status_failures.len() as u64;
        MetricsSnapshot {
            worker_id,
            requests: latencies_us.len() as u64,
            successes: latencies_us.len() as u64 - failures,
            failures,
            bytes: 100 * latencies_us.len() as u64,
            timeouts: 0,
            connection_errors: 0,
            by_status,
            latency: LatencyPayload::Delta(hist),
        }
    }

    #[test]
    fn fold_accumulates_counters_and_histogram() {
        let mut agg = Aggregator::new();
        agg.fold(&snapshot(0, &[1_000, 2_000], &[])).unwrap();
        agg.fold(&snapshot(1, &[3_000], &[500])).unwrap();

        assert_eq!(agg.requests, 3);
        assert_eq!(agg.successes, 2);
        assert_eq!(agg.failures, 1);
        assert_eq!(agg.bytes, 300);
        assert_eq!(agg.by_status.get(&500), Some(&1));
        assert_eq!(agg.histogram().count(), 3);
    }

    #[test]
    fn fold_accepts_raw_sample_payloads() {
        let mut agg = Aggregator::new();
        let snap = MetricsSnapshot {
            worker_id: 2,
            requests: 3,
            successes: 3,
            failures: 0,
            bytes: 64,
            timeouts: 0,
            connection_errors: 0,
            by_status: BTreeMap::new(),
            latency: LatencyPayload::Raw(vec![500, 1_500, 2_500]),
        };
        agg.fold(&snap).unwrap();

        assert_eq!(agg.histogram().count(), 3);
        assert_eq!(agg.histogram().min_us(), 500);
        assert_eq!(agg.histogram().max_us(), 2_500);
    }

    #[test]
    fn folding_order_does_not_change_the_result() {
        let snaps = vec![
            snapshot(0, &[1_000, 9_000, 9_000], &[502]),
            snapshot(1, &[4_000], &[]),
            snapshot(2, &[250_000, 2_000, 70_000], &[500, 500]),
        ];

        let mut forward = Aggregator::new();
        for s in &snaps {
            forward.fold(s).unwrap();
        }
        let mut reverse = Aggregator::new();
        for s in snaps.iter().rev() {
            reverse.fold(s).unwrap();
        }

        assert_eq!(forward.requests, reverse.requests);
        assert_eq!(forward.failures, reverse.failures);
        assert_eq!(forward.by_status, reverse.by_status);
        for p in [50.0, 75.0, 90.0, 95.0, 99.0, 99.9] {
            assert_eq!(
                forward.histogram().percentile_us(p),
                reverse.histogram().percentile_us(p)
            );
        }
        assert_eq!(forward.histogram().min_us(), reverse.histogram().min_us());
        assert_eq!(forward.histogram().max_us(), reverse.histogram().max_us());
    }
}
