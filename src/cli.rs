//! Command-line front end: argument parsing and report rendering.

use crate::domain::TestStats;
use crate::engine::export::ExportFormat;
use clap::{Parser, ValueEnum};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run an HTTP load test from a JSON config", long_about = None)]
pub struct Args {
    /// Load test configuration (camelCase JSON)
    pub config: PathBuf,

    /// How the final statistics are printed
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also write the finished run as json or csv
    #[arg(long)]
    pub export: Option<ExportFormat>,

    /// Export destination; defaults to the generated file name
    #[arg(long, requires = "export")]
    pub out: Option<PathBuf>,

    /// Seconds between progress lines, 0 disables them
    #[arg(long, default_value_t = 1)]
    pub progress_secs: u64,

    /// Log filter directive, e.g. `debug` or `getman_loadtest=trace`
    #[arg(long, env = "GETMAN_LOG")]
    pub log_level: Option<String>,
}

impl Args {
    pub fn progress_interval(&self) -> Option<Duration> {
        (self.progress_secs > 0).then(|| Duration::from_secs(self.progress_secs))
    }
}

/// Output format for the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn render_stats(stats: &TestStats, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(stats),
        OutputFormat::Text => Ok(render_text(stats)),
    }
}

pub fn progress_line(stats: &TestStats, elapsed: Duration) -> String {
    format!(
        "[{:>5.1}s] requests={} errors={} avg={:.1}ms p95={:.1}ms rps={:.1}",
        elapsed.as_secs_f64(),
        stats.total_requests,
        stats.error_count,
        stats.avg_response_time,
        stats.percentiles.p95_ms,
        stats.throughput,
    )
}

fn render_text(stats: &TestStats) -> String {
    let mut out = String::new();
    let error_rate = if stats.total_requests > 0 {
        stats.error_count as f64 / stats.total_requests as f64 * 100.0
    } else {
        0.0
    };

    let _ = writeln!(out, "Requests      {}", stats.total_requests);
    let _ = writeln!(
        out,
        "Succeeded     {}  Failed {} ({error_rate:.2}%)",
        stats.success_count, stats.error_count
    );
    let _ = writeln!(out, "Throughput    {:.2} req/s", stats.throughput);
    let _ = writeln!(
        out,
        "Latency       avg {:.2}ms  min {:.2}ms  max {:.2}ms  stddev {:.2}ms  cv {:.1}%",
        stats.avg_response_time,
        stats.min_response_time,
        stats.max_response_time,
        stats.std_dev,
        stats.coefficient_of_variation,
    );
    let _ = writeln!(
        out,
        "Percentiles   p50 {:.2}ms  p90 {:.2}ms  p95 {:.2}ms  p99 {:.2}ms",
        stats.percentiles.p50_ms,
        stats.percentiles.p90_ms,
        stats.percentiles.p95_ms,
        stats.percentiles.p99_ms,
    );
    let _ = writeln!(
        out,
        "Apdex         {:.3}  (satisfied {:.1}%, tolerating {:.1}%, frustrated {:.1}%)",
        stats.apdex_score,
        stats.apdex_breakdown.satisfied,
        stats.apdex_breakdown.tolerating,
        stats.apdex_breakdown.frustrated,
    );

    if let Some(timings) = &stats.network_timings {
        let _ = writeln!(
            out,
            "Network       ttfb {:.2}ms  download {:.2}ms  total {:.2}ms",
            timings.ttfb_ms, timings.download_ms, timings.total_ms
        );
    }

    if !stats.status_code_counts.is_empty() {
        let codes: Vec<String> = stats
            .status_code_counts
            .iter()
            .map(|(code, count)| format!("{code}={count}"))
            .collect();
        let _ = writeln!(out, "Status codes  {}", codes.join("  "));
    }

    if !stats.error_distribution.is_empty() {
        let _ = writeln!(out, "Errors");
        for (label, count) in &stats.error_distribution {
            let _ = writeln!(out, "  {count:>6}  {label}");
        }
    }

    out
}
