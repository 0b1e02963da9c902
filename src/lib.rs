//! HTTP load test engine.
//!
//! A [`LoadTest`] launches virtual users against one or more endpoints, reports
//! one [`TestResultSample`] per attempt and stops through a soft/hard pair of
//! [`StopSignal`]s. [`aggregate`] turns the collected samples into [`TestStats`].

pub mod cli;
pub mod domain;
pub mod engine;
pub mod error;

pub use domain::*;
pub use engine::cancel::{pause, StopSignal, StopSignals};
pub use engine::executor::{Attempt, RequestExecutor};
pub use engine::export::{export_run, ExportFormat, ExportPayload, RunExport};
pub use engine::monitor::ResourceMonitor;
pub use engine::scheduler::{
    launch_plan, run_load_test, LaunchBatch, LoadTest, ResourceSink, RunState, SampleCollector,
    SampleSink,
};
pub use engine::stats::{aggregate, aggregate_with_prior, classify_error, NetworkTimingTotals};
pub use engine::timing::{RequestTimeline, TimelineProbe, TimingProbe};
pub use error::{ConfigError, LoadTestError, MonitorError};
