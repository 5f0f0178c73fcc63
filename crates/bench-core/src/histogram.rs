use thiserror::Error;

/// Default bucket width in microseconds (1 ms).
pub const DEFAULT_BUCKET_WIDTH_US: u64 = 1_000;
/// Default bucket count, covering [0, 10 s).
pub const DEFAULT_BUCKET_COUNT: usize = 10_000;

#[derive(Debug, Error)]
#[error("cannot merge histograms with different geometry ({lhs_buckets}x{lhs_width}us vs {rhs_buckets}x{rhs_width}us)")]
pub struct GeometryMismatch {
    lhs_buckets: usize,
    lhs_width: u64,
    rhs_buckets: usize,
    rhs_width: u64,
}

/// Fixed linear-bucket latency histogram over microseconds.
///
/// `record` is O(1) and allocation-free; `percentile` is an O(B) cumulative
/// scan. Samples at or beyond the covered range are clamped into the last
/// bucket. Two histograms merge losslessly as long as their geometry matches.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    bucket_width_us: u64,
    buckets: Vec<u64>,
    count: u64,
    sum_us: u64,
    min_us: u64,
    max_us: u64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::with_geometry(DEFAULT_BUCKET_COUNT, DEFAULT_BUCKET_WIDTH_US)
    }

    pub fn with_geometry(bucket_count: usize, bucket_width_us: u64) -> Self {
        Self {
            bucket_width_us: bucket_width_us.max(1),
            buckets: vec![0; bucket_count.max(1)],
            count: 0,
            sum_us: 0,
            min_us: u64::MAX,
            max_us: 0,
        }
    }

    /// Upper edge of the covered range in microseconds.
    pub fn max_trackable_us(&self) -> u64 {
        self.bucket_width_us * self.buckets.len() as u64
    }

    #[inline]
    pub fn record(&mut self, latency_us: u64) {
        let clamped = latency_us.min(self.max_trackable_us() - 1);
        let idx = (clamped / self.bucket_width_us) as usize;
        self.buckets[idx] = self.buckets[idx].saturating_add(1);
        self.count = self.count.saturating_add(1);
        self.sum_us = self.sum_us.saturating_add(clamped);
        self.min_us = self.min_us.min(clamped);
        self.max_us = self.max_us.max(clamped);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn min_us(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.min_us
        }
    }

    pub fn max_us(&self) -> u64 {
        self.max_us
    }

    pub fn mean_us(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_us as f64 / self.count as f64
    }

    /// Sample standard deviation computed from bucket midpoints weighted by
    /// bucket counts. Zero when fewer than two samples were recorded.
    pub fn stddev_us(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let mean = self.mean_us();
        let mut sq_sum = 0.0;
        for (idx, &c) in self.buckets.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let midpoint = (idx as f64 + 0.5) * self.bucket_width_us as f64;
            let delta = midpoint - mean;
            sq_sum += delta * delta * c as f64;
        }
        (sq_sum / (self.count - 1) as f64).sqrt()
    }

    /// Percentile estimate in microseconds, using a 1-indexed ceil rank and
    /// returning the midpoint of the first bucket whose cumulative count
    /// reaches it. Zero when the histogram is empty.
    pub fn percentile_us(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let p = p.clamp(0.0, 100.0);
        let rank = ((p / 100.0 * self.count as f64).ceil() as u64).max(1);

        let mut cumulative = 0u64;
        for (idx, &c) in self.buckets.iter().enumerate() {
            cumulative = cumulative.saturating_add(c);
            if cumulative >= rank {
                return (idx as f64 + 0.5) * self.bucket_width_us as f64;
            }
        }
        self.max_trackable_us() as f64
    }

    /// Elementwise merge of `other` into `self`. Both histograms must share
    /// the same bucket count and width.
    pub fn merge(&mut self, other: &LatencyHistogram) -> Result<(), GeometryMismatch> {
        if self.buckets.len() != other.buckets.len() || self.bucket_width_us != other.bucket_width_us
        {
            return Err(GeometryMismatch {
                lhs_buckets: self.buckets.len(),
                lhs_width: self.bucket_width_us,
                rhs_buckets: other.buckets.len(),
                rhs_width: other.bucket_width_us,
            });
        }
        for (dst, src) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            *dst = dst.saturating_add(*src);
        }
        self.count = self.count.saturating_add(other.count);
        self.sum_us = self.sum_us.saturating_add(other.sum_us);
        if other.count > 0 {
            self.min_us = self.min_us.min(other.min_us);
            self.max_us = self.max_us.max(other.max_us);
        }
        Ok(())
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_reports_zeroes() {
        let h = LatencyHistogram::new();
        assert_eq!(h.count(), 0);
        assert_eq!(h.min_us(), 0);
        assert_eq!(h.max_us(), 0);
        assert_eq!(h.mean_us(), 0.0);
        assert_eq!(h.stddev_us(), 0.0);
        assert_eq!(h.percentile_us(50.0), 0.0);
        assert_eq!(h.percentile_us(99.9), 0.0);
    }

    #[test]
    fn record_updates_count_sum_min_max() {
        let mut h = LatencyHistogram::new();
        h.record(1_500);
        h.record(2_500);
        h.record(500);

        assert_eq!(h.count(), 3);
        assert_eq!(h.min_us(), 500);
        assert_eq!(h.max_us(), 2_500);
        assert!((h.mean_us() - 1_500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percentiles_are_deterministic() {
        let mut h = LatencyHistogram::new();
        // 50 samples at 10ms, 30 at 20ms, 20 at 50ms.
        for _ in 0..50 {
            h.record(10_000);
        }
        for _ in 0..30 {
            h.record(20_000);
        }
        for _ in 0..20 {
            h.record(50_000);
        }

        assert_eq!(h.percentile_us(50.0), 10_500.0);
        assert_eq!(h.percentile_us(80.0), 20_500.0);
        assert_eq!(h.percentile_us(95.0), 50_500.0);
        assert_eq!(h.percentile_us(99.0), 50_500.0);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let mut h = LatencyHistogram::new();
        for v in [100u64, 900, 4_200, 17_000, 17_000, 250_000, 1_200_000] {
            h.record(v);
        }
        let ps = [0.0, 50.0, 75.0, 90.0, 95.0, 99.0, 99.9, 100.0];
        for pair in ps.windows(2) {
            assert!(h.percentile_us(pair[0]) <= h.percentile_us(pair[1]));
        }
    }

    #[test]
    fn oversized_samples_clamp_into_last_bucket() {
        let mut h = LatencyHistogram::new();
        let max = h.max_trackable_us();
        h.record(max);
        h.record(max + 5_000_000);
        h.record(u64::MAX);

        assert_eq!(h.count(), 3);
        assert_eq!(h.max_us(), max - 1);
        let p999 = h.percentile_us(99.9);
        assert!(p999 >= (max - DEFAULT_BUCKET_WIDTH_US) as f64);
        assert!(p999 < max as f64);
    }

    #[test]
    fn merge_accumulates_and_keeps_extremes() {
        let mut a = LatencyHistogram::new();
        let mut b = LatencyHistogram::new();
        a.record(1_000);
        a.record(3_000);
        b.record(9_000);

        a.merge(&b).unwrap();
        assert_eq!(a.count(), 3);
        assert_eq!(a.min_us(), 1_000);
        assert_eq!(a.max_us(), 9_000);
    }

    #[test]
    fn merge_is_commutative() {
        let samples_a = [120u64, 950, 950, 4_000, 88_000];
        let samples_b = [40u64, 2_500, 61_000, 61_000];
        let samples_c = [700u64, 700, 700];

        let build = |samples: &[u64]| {
            let mut h = LatencyHistogram::new();
            for &s in samples {
                h.record(s);
            }
            h
        };

        let mut left = build(&samples_a);
        left.merge(&build(&samples_b)).unwrap();
        left.merge(&build(&samples_c)).unwrap();

        let mut right = build(&samples_c);
        right.merge(&build(&samples_a)).unwrap();
        right.merge(&build(&samples_b)).unwrap();

        assert_eq!(left.count(), right.count());
        for p in [50.0, 75.0, 90.0, 99.0, 99.9] {
            assert_eq!(left.percentile_us(p), right.percentile_us(p));
        }
        assert_eq!(left.min_us(), right.min_us());
        assert_eq!(left.max_us(), right.max_us());
    }

    #[test]
    fn merge_rejects_mismatched_geometry() {
        let mut a = LatencyHistogram::new();
        let b = LatencyHistogram::with_geometry(100, 1_000);
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn merge_empty_does_not_disturb_extremes() {
        let mut a = LatencyHistogram::new();
        a.record(5_000);
        a.merge(&LatencyHistogram::new()).unwrap();
        assert_eq!(a.min_us(), 5_000);
        assert_eq!(a.max_us(), 5_000);
    }
}
