use crate::domain::{
    ApdexBreakdown, LatencyPercentiles, NetworkTimings, TestResultSample, TestStats,
    TimeseriesPoint, TtfbStats,
};
use hdrhistogram::Histogram;
use std::collections::BTreeMap;

pub const APDEX_THRESHOLD_MS: f64 = 500.0;

pub const ABORTED_LABEL: &str = "Aborted / Timeout";
pub const NETWORK_ERROR_LABEL: &str = "Network Error";
pub const UNKNOWN_ERROR_LABEL: &str = "Unknown Error";

const ABORT_MARKERS: [&str; 4] = ["abort", "timeout", "timed out", "deadline"];
const NETWORK_MARKERS: [&str; 5] = ["network", "failed to fetch", "connect", "dns", "cors"];

const HISTOGRAM_MAX_US: u64 = 3_600_000_000;

/// Running sums of network timings, so a caller that already folded older
/// samples away can still get a mean over the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetworkTimingTotals {
    pub sum: NetworkTimings,
    pub count: u64,
}

impl NetworkTimingTotals {
    pub fn from_samples(samples: &[TestResultSample]) -> Self {
        let mut totals = Self::default();
        for timings in samples.iter().filter_map(|sample| sample.network_timings.as_ref()) {
            totals.add(timings);
        }
        totals
    }

    pub fn add(&mut self, timings: &NetworkTimings) {
        self.sum.dns_ms += timings.dns_ms;
        self.sum.tcp_ms += timings.tcp_ms;
        self.sum.tls_ms += timings.tls_ms;
        self.sum.ttfb_ms += timings.ttfb_ms;
        self.sum.download_ms += timings.download_ms;
        self.sum.total_ms += timings.total_ms;
        self.count += 1;
    }

    pub fn merge(&mut self, other: &NetworkTimingTotals) {
        if other.count == 0 {
            return;
        }
        self.add(&other.sum);
        self.count += other.count - 1;
    }

    pub fn mean(&self) -> Option<NetworkTimings> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(NetworkTimings {
            dns_ms: self.sum.dns_ms / n,
            tcp_ms: self.sum.tcp_ms / n,
            tls_ms: self.sum.tls_ms / n,
            ttfb_ms: self.sum.ttfb_ms / n,
            download_ms: self.sum.download_ms / n,
            total_ms: self.sum.total_ms / n,
        })
    }
}

#[derive(Default)]
struct SeriesBucket {
    success: u64,
    error: u64,
    latencies: Vec<f64>,
}

/// Histogram key for a failed sample.
pub fn classify_error(sample: &TestResultSample) -> String {
    if sample.status_code > 0 {
        return format!("HTTP {} ({})", sample.status_code, sample.status_text);
    }

    let message = format!(
        "{} {}",
        sample.status_text,
        sample.error.as_deref().unwrap_or_default()
    )
    .to_ascii_lowercase();

    if ABORT_MARKERS.iter().any(|marker| message.contains(marker)) {
        ABORTED_LABEL.to_string()
    } else if NETWORK_MARKERS.iter().any(|marker| message.contains(marker)) {
        NETWORK_ERROR_LABEL.to_string()
    } else {
        UNKNOWN_ERROR_LABEL.to_string()
    }
}

pub fn aggregate(samples: &[TestResultSample]) -> TestStats {
    aggregate_with_prior(samples, &NetworkTimingTotals::default())
}

/// Pure reduction of `samples` into a stats snapshot. Calling it again on the
/// same slice yields an identical result.
pub fn aggregate_with_prior(
    samples: &[TestResultSample],
    prior_timings: &NetworkTimingTotals,
) -> TestStats {
    let mut stats = TestStats::default();
    let mut timing_totals = *prior_timings;
    let mut latency_sum = 0.0;
    let mut min_latency = f64::INFINITY;
    let mut max_latency = f64::NEG_INFINITY;
    let mut first_ts = u64::MAX;
    let mut last_ts = 0u64;
    let mut satisfied = 0u64;
    let mut tolerating = 0u64;
    let mut ttfb_values = Vec::new();
    let mut series = BTreeMap::<u64, SeriesBucket>::new();
    let mut histogram = Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_US, 3).ok();

    for sample in samples {
        stats.total_requests += 1;
        latency_sum += sample.latency_ms;
        min_latency = min_latency.min(sample.latency_ms);
        max_latency = max_latency.max(sample.latency_ms);
        first_ts = first_ts.min(sample.timestamp_ms);
        last_ts = last_ts.max(sample.timestamp_ms);

        *stats
            .status_code_counts
            .entry(sample.status_code.to_string())
            .or_insert(0) += 1;

        if sample.success {
            stats.success_count += 1;
            if sample.latency_ms <= APDEX_THRESHOLD_MS {
                satisfied += 1;
            } else if sample.latency_ms <= 4.0 * APDEX_THRESHOLD_MS {
                tolerating += 1;
            }
        } else {
            stats.error_count += 1;
            *stats
                .error_distribution
                .entry(classify_error(sample))
                .or_insert(0) += 1;
        }

        if let Some(timings) = &sample.network_timings {
            timing_totals.add(timings);
            if timings.ttfb_ms >= 0.0 {
                ttfb_values.push(timings.ttfb_ms);
            }
        }

        if let Some(histogram) = histogram.as_mut() {
            let latency_us = ((sample.latency_ms * 1000.0).round() as u64).clamp(1, HISTOGRAM_MAX_US);
            let _ = histogram.record(latency_us);
        }

        let bucket = series
            .entry((sample.timestamp_ms / 1000) * 1000)
            .or_default();
        if sample.success {
            bucket.success += 1;
        } else {
            bucket.error += 1;
        }
        bucket.latencies.push(sample.latency_ms);
    }

    stats.network_timings = timing_totals.mean();
    stats.ttfb = ttfb_stats(&ttfb_values);

    if stats.total_requests == 0 {
        return stats;
    }

    let total = stats.total_requests as f64;
    let mean = latency_sum / total;
    stats.avg_response_time = mean;
    stats.min_response_time = min_latency;
    stats.max_response_time = max_latency;

    let variance = samples
        .iter()
        .map(|sample| (sample.latency_ms - mean).powi(2))
        .sum::<f64>()
        / total;
    stats.std_dev = variance.sqrt();
    stats.coefficient_of_variation = if mean > 0.0 {
        stats.std_dev / mean * 100.0
    } else {
        0.0
    };

    let span_secs = last_ts.saturating_sub(first_ts) as f64 / 1000.0;
    stats.throughput = if stats.total_requests > 1 && span_secs > 0.0 {
        total / span_secs
    } else {
        0.0
    };

    let frustrated = stats.total_requests - satisfied - tolerating;
    stats.apdex_score = (satisfied as f64 + tolerating as f64 / 2.0) / total;
    stats.apdex_breakdown = ApdexBreakdown {
        satisfied: satisfied as f64 / total * 100.0,
        tolerating: tolerating as f64 / total * 100.0,
        frustrated: frustrated as f64 / total * 100.0,
    };

    if let Some(histogram) = &histogram {
        let at = |quantile: f64| histogram.value_at_quantile(quantile) as f64 / 1000.0;
        stats.percentiles = LatencyPercentiles {
            p50_ms: at(0.50),
            p90_ms: at(0.90),
            p95_ms: at(0.95),
            p99_ms: at(0.99),
        };
    }

    stats.timeseries = series
        .into_iter()
        .map(|(bucket_ts, bucket)| {
            let mut sorted = bucket.latencies;
            sorted.sort_by(|left, right| left.total_cmp(right));
            let latency_avg_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
            TimeseriesPoint {
                bucket_ts_ms: bucket_ts,
                success_count: bucket.success,
                error_count: bucket.error,
                latency_avg_ms,
                latency_p95_ms: nearest_rank(&sorted, 0.95),
            }
        })
        .collect();

    stats
}

fn ttfb_stats(values: &[f64]) -> Option<TtfbStats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let avg = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|value| (value - avg).powi(2)).sum::<f64>() / n;
    Some(TtfbStats {
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        avg,
        std_dev: variance.sqrt(),
    })
}

/// Nearest-rank value of an ascending slice; `quantile` in 0..=1.
fn nearest_rank(sorted: &[f64], quantile: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        len => {
            let rank = (quantile * len as f64).ceil().max(1.0) as usize;
            sorted[rank.min(len) - 1]
        }
    }
}
