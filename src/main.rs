use anyhow::{Context, Result};
use clap::Parser;
use getman_loadtest::cli::{progress_line, render_stats, Args};
use getman_loadtest::{
    aggregate, export_run, LoadTest, LoadTestConfig, ResourceSample, RunExport, SampleCollector,
    StopSignals, TestResultSample,
};
use std::path::PathBuf;
use tokio::time::{interval_at, Instant};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.log_level.as_deref() {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter `{directive}`"))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("getman_loadtest=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let config: LoadTestConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", args.config.display()))?;

    let test = LoadTest::new(config.clone())?;
    let signals = StopSignals::new();
    let samples = SampleCollector::<TestResultSample>::new();
    let resources = SampleCollector::<ResourceSample>::new();

    let interrupt = {
        let signals = signals.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, stopping now");
                signals.stop_now();
            }
        })
    };

    let progress = args.progress_interval().map(|period| {
        let samples = samples.clone();
        let started = Instant::now();
        tokio::spawn(async move {
            let mut ticker = interval_at(started + period, period);
            loop {
                ticker.tick().await;
                let stats = aggregate(&samples.snapshot());
                tracing::info!("{}", progress_line(&stats, started.elapsed()));
            }
        })
    });

    let outcome = test
        .run(
            samples.clone(),
            resources.clone(),
            signals.soft.clone(),
            signals.hard.clone(),
        )
        .await;
    interrupt.abort();
    if let Some(progress) = progress {
        progress.abort();
    }
    outcome?;

    let samples = samples.snapshot();
    let stats = aggregate(&samples);
    println!("{}", render_stats(&stats, args.format)?);

    let resources = resources.snapshot();
    if !resources.is_empty() {
        let peak_cpu = resources.iter().map(|sample| sample.cpu).fold(0.0, f64::max);
        let peak_memory = resources
            .iter()
            .map(|sample| sample.memory)
            .fold(0.0, f64::max);
        tracing::info!(
            polls = resources.len(),
            peak_cpu,
            peak_memory,
            "target resource usage"
        );
    }

    if let Some(format) = args.export {
        let run = RunExport {
            run_id: uuid::Uuid::new_v4().to_string(),
            config,
            stats,
            samples,
        };
        let payload = export_run(&run, format).map_err(anyhow::Error::msg)?;
        let path = args
            .out
            .clone()
            .unwrap_or_else(|| PathBuf::from(&payload.file_name));
        std::fs::write(&path, payload.content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), mime = %payload.mime_type, "export written");
    }

    Ok(())
}
