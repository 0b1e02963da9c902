use crate::domain::ResourceSample;
use crate::engine::cancel::StopSignal;
use crate::engine::executor::now_ms;
use crate::engine::scheduler::ResourceSink;
use crate::error::{LoadTestError, MonitorError};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ResourceReading {
    cpu: f64,
    memory: f64,
}

/// Polls a `{cpu, memory}` JSON endpoint on a fixed period.
#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    client: Client,
    url: String,
    interval: Duration,
}

impl ResourceMonitor {
    pub fn new(url: impl Into<String>) -> Result<Self, LoadTestError> {
        let client = Client::builder()
            .timeout(POLL_TIMEOUT)
            .build()
            .map_err(LoadTestError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
            interval: POLL_INTERVAL,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Polls until `stop` trips. The first poll happens one interval after
    /// the call. Returns the number of samples emitted.
    pub async fn run<S: ResourceSink>(self, stop: StopSignal, sink: S) -> u64 {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut emitted = 0u64;

        loop {
            tokio::select! {
                _ = stop.tripped() => break,
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                _ = stop.tripped() => break,
                polled = self.poll_once() => polled,
            };
            match polled {
                Ok(sample) => {
                    sink.on_resource(sample);
                    emitted += 1;
                }
                Err(err) => {
                    tracing::warn!(url = %self.url, error = %err, "resource poll failed, skipping");
                }
            }
        }

        tracing::debug!(url = %self.url, emitted, "resource monitor stopped");
        emitted
    }

    pub async fn poll_once(&self) -> Result<ResourceSample, MonitorError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;
        let reading: ResourceReading = serde_json::from_slice(&bytes)?;
        Ok(ResourceSample {
            timestamp_ms: now_ms(),
            cpu: reading.cpu,
            memory: reading.memory,
        })
    }
}
