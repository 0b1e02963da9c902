use crate::domain::{
    Endpoint, LoadProfile, LoadTestConfig, ResourceSample, RunMode, TestResultSample,
};
use crate::engine::cancel::{pause, schedule_hard_stop, StopSignal};
use crate::engine::executor::{Attempt, RequestExecutor};
use crate::engine::monitor::ResourceMonitor;
use crate::engine::timing::TimingProbe;
use crate::error::LoadTestError;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    /// Duration mode only: no new iterations, in-flight requests may finish.
    Finishing,
    Completed,
    Error,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Error)
    }
}

/// Receives exactly one sample per attempt that sent a request.
pub trait SampleSink: Send + Sync {
    fn on_result(&self, sample: TestResultSample);
}

impl<F> SampleSink for F
where
    F: Fn(TestResultSample) + Send + Sync,
{
    fn on_result(&self, sample: TestResultSample) {
        self(sample)
    }
}

pub trait ResourceSink: Send + Sync {
    fn on_resource(&self, sample: ResourceSample);
}

impl<F> ResourceSink for F
where
    F: Fn(ResourceSample) + Send + Sync,
{
    fn on_resource(&self, sample: ResourceSample) {
        self(sample)
    }
}

/// Append-only buffer shared between the engine and readers that take snapshots.
#[derive(Debug)]
pub struct SampleCollector<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for SampleCollector<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T> Default for SampleCollector<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> SampleCollector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SampleSink for SampleCollector<TestResultSample> {
    fn on_result(&self, sample: TestResultSample) {
        self.push(sample);
    }
}

impl ResourceSink for SampleCollector<ResourceSample> {
    fn on_resource(&self, sample: ResourceSample) {
        self.push(sample);
    }
}

/// Start `count` virtual users after waiting `delay_before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchBatch {
    pub delay_before: Duration,
    pub count: u32,
}

/// How duration-mode runners are started over time.
pub fn launch_plan(profile: &LoadProfile, users: u32, duration_secs: u64) -> Vec<LaunchBatch> {
    match *profile {
        LoadProfile::RampUp { ramp_up_secs } => {
            if ramp_up_secs == 0 || users <= 1 {
                return vec![LaunchBatch {
                    delay_before: Duration::ZERO,
                    count: users,
                }];
            }
            let spacing = Duration::from_millis(ramp_up_secs * 1000 / u64::from(users));
            (0..users)
                .map(|user| LaunchBatch {
                    delay_before: if user == 0 { Duration::ZERO } else { spacing },
                    count: 1,
                })
                .collect()
        }
        LoadProfile::StairStep {
            initial_users,
            step_users,
            step_duration_secs,
        } => {
            let mut plan = Vec::new();
            let mut started = initial_users.min(users);
            if started > 0 {
                plan.push(LaunchBatch {
                    delay_before: Duration::ZERO,
                    count: started,
                });
            }
            if step_duration_secs == 0 || step_users == 0 {
                return plan;
            }
            let steps = duration_secs / step_duration_secs;
            for _ in 0..steps {
                let count = step_users.min(users - started);
                if count == 0 {
                    break;
                }
                plan.push(LaunchBatch {
                    delay_before: Duration::from_secs(step_duration_secs),
                    count,
                });
                started += count;
            }
            plan
        }
    }
}

struct VirtualUser {
    id: u32,
    executor: Arc<RequestExecutor>,
    targets: Arc<Vec<Endpoint>>,
    counter: Arc<AtomicU64>,
    limit: Option<u64>,
    pacing: Duration,
    soft: StopSignal,
    hard: StopSignal,
    samples: mpsc::UnboundedSender<TestResultSample>,
}

impl VirtualUser {
    async fn run(self) {
        tracing::debug!(user = self.id, "virtual user started");
        let mut sent = 0u64;

        loop {
            if self.soft.is_tripped() || self.hard.is_tripped() {
                break;
            }

            let index = self.counter.fetch_add(1, Ordering::Relaxed);
            if self.limit.is_some_and(|limit| index >= limit) {
                break;
            }

            let Some(endpoint) = self.targets.choose(&mut rand::thread_rng()).cloned() else {
                break;
            };

            match self.executor.execute(Some(index), &endpoint, &self.hard).await {
                Attempt::Completed(sample) => {
                    if self.samples.send(sample).is_err() {
                        break;
                    }
                    sent += 1;
                }
                Attempt::Exhausted => {
                    tracing::debug!(user = self.id, index, "data records exhausted");
                    break;
                }
            }

            if !self.pacing.is_zero() && !pause(self.pacing, &self.soft).await {
                break;
            }
        }

        tracing::debug!(user = self.id, sent, "virtual user finished");
    }
}

/// One configured load test. Construction validates the configuration and
/// builds the HTTP clients, so `run` only fails if a virtual user dies.
pub struct LoadTest {
    executor: RequestExecutor,
    monitor: Option<ResourceMonitor>,
    state: Arc<watch::Sender<RunState>>,
}

impl std::fmt::Debug for LoadTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadTest")
            .field("executor", &self.executor)
            .field("monitor", &self.monitor)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl LoadTest {
    pub fn new(config: LoadTestConfig) -> Result<Self, LoadTestError> {
        let monitor = config
            .monitoring_url()
            .map(ResourceMonitor::new)
            .transpose()?;
        let executor = RequestExecutor::new(Arc::new(config))?;
        let (state, _) = watch::channel(RunState::Idle);
        Ok(Self {
            executor,
            monitor,
            state: Arc::new(state),
        })
    }

    pub fn with_timing_probe(mut self, probe: Arc<dyn TimingProbe>) -> Self {
        self.executor = self.executor.with_timing_probe(probe);
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor = self.monitor.map(|monitor| monitor.with_interval(interval));
        self
    }

    pub fn config(&self) -> &LoadTestConfig {
        self.executor.config()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Runs the test to a terminal state. Per-request failures arrive as
    /// failed samples; the only error is a virtual-user task that died.
    pub async fn run<R, M>(
        self,
        on_result: R,
        on_resource_sample: M,
        soft_stop: StopSignal,
        hard_stop: StopSignal,
    ) -> Result<(), LoadTestError>
    where
        R: SampleSink + 'static,
        M: ResourceSink + 'static,
    {
        let LoadTest {
            executor,
            monitor,
            state,
        } = self;
        let config = executor.config();
        let run_mode = config.run_mode;
        let users = config.users;
        let pacing = Duration::from_millis(config.pacing_ms);
        let grace = Duration::from_secs(config.graceful_shutdown_secs);
        let load_profile = config.load_profile;
        let targets = Arc::new(config.targets());
        let executor = Arc::new(executor);

        tracing::info!(
            mode = ?run_mode,
            users,
            targets = targets.len(),
            pacing_ms = pacing.as_millis() as u64,
            "load test started"
        );
        state.send_replace(RunState::Running);

        let (sample_tx, mut sample_rx) = mpsc::unbounded_channel::<TestResultSample>();
        let forwarder = tokio::spawn(async move {
            let mut delivered = 0u64;
            while let Some(sample) = sample_rx.recv().await {
                on_result.on_result(sample);
                delivered += 1;
            }
            delivered
        });

        let monitor_stop = soft_stop.child();
        let monitor_task = monitor.map(|monitor| {
            tracing::debug!(url = monitor.url(), "resource monitor enabled");
            tokio::spawn(monitor.run(monitor_stop.clone(), on_resource_sample))
        });

        let mut timers: Vec<JoinHandle<()>> = Vec::new();
        if let RunMode::Duration { duration_secs } = run_mode {
            timers.push(duration_timer(
                soft_stop.clone(),
                Duration::from_secs(duration_secs),
            ));
            timers.push(schedule_hard_stop(&soft_stop, &hard_stop, grace));
            let finishing = state.clone();
            timers.push(soft_stop.on_trip(move || {
                tracing::info!("soft stop tripped, letting in-flight requests finish");
                finishing.send_if_modified(|current| {
                    if *current == RunState::Running {
                        *current = RunState::Finishing;
                        true
                    } else {
                        false
                    }
                });
            }));
        }

        let counter = Arc::new(AtomicU64::new(0));
        let spawn_user = |workers: &mut JoinSet<()>, id: u32, limit: Option<u64>| {
            let user = VirtualUser {
                id,
                executor: executor.clone(),
                targets: targets.clone(),
                counter: counter.clone(),
                limit,
                pacing,
                soft: soft_stop.clone(),
                hard: hard_stop.clone(),
                samples: sample_tx.clone(),
            };
            workers.spawn(user.run());
        };

        let mut workers = JoinSet::new();
        match run_mode {
            RunMode::Iterations { iterations } => {
                for id in 0..users {
                    spawn_user(&mut workers, id, Some(iterations));
                }
            }
            RunMode::Duration { duration_secs } => {
                let mut next_id = 0u32;
                for batch in launch_plan(&load_profile, users, duration_secs) {
                    if !pause(batch.delay_before, &soft_stop).await {
                        break;
                    }
                    tracing::debug!(count = batch.count, started = next_id, "launching virtual users");
                    for _ in 0..batch.count {
                        spawn_user(&mut workers, next_id, None);
                        next_id += 1;
                    }
                }
            }
        }
        drop(spawn_user);
        drop(sample_tx);

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(error = %err, "virtual user task died, stopping the run");
                soft_stop.trip();
                hard_stop.trip();
                failure.get_or_insert(err);
            }
        }

        let delivered = match forwarder.await {
            Ok(delivered) => delivered,
            Err(err) => {
                tracing::warn!(error = %err, "sample sink task died");
                failure.get_or_insert(err);
                0
            }
        };

        monitor_stop.trip();
        if let Some(task) = monitor_task {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "resource monitor task died");
            }
        }
        for timer in timers {
            timer.abort();
        }

        match failure {
            Some(err) => {
                state.send_replace(RunState::Error);
                tracing::info!(samples = delivered, state = ?RunState::Error, "load test finished");
                Err(LoadTestError::Worker(err))
            }
            None => {
                state.send_replace(RunState::Completed);
                tracing::info!(samples = delivered, state = ?RunState::Completed, "load test finished");
                Ok(())
            }
        }
    }
}

fn duration_timer(soft_stop: StopSignal, duration: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if pause(duration, &soft_stop).await {
            tracing::info!(duration_secs = duration.as_secs(), "test duration elapsed");
            soft_stop.trip();
        }
    })
}

/// Validates `config`, runs it to a terminal state and reports every sample
/// through `on_result`.
pub async fn run_load_test<R, M>(
    config: LoadTestConfig,
    on_result: R,
    on_resource_sample: M,
    soft_stop: StopSignal,
    hard_stop: StopSignal,
) -> Result<(), LoadTestError>
where
    R: SampleSink + 'static,
    M: ResourceSink + 'static,
{
    LoadTest::new(config)?
        .run(on_result, on_resource_sample, soft_stop, hard_stop)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    #[test]
    fn zero_ramp_starts_everyone_at_once() {
        let plan = launch_plan(&LoadProfile::RampUp { ramp_up_secs: 0 }, 5, 30);
        assert_eq!(
            plan,
            vec![LaunchBatch {
                delay_before: Duration::ZERO,
                count: 5
            }]
        );
    }

    #[test]
    fn ramp_up_spaces_starts_evenly() {
        let plan = launch_plan(&LoadProfile::RampUp { ramp_up_secs: 10 }, 4, 30);
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].delay_before, Duration::ZERO);
        assert!(plan[1..]
            .iter()
            .all(|batch| batch.delay_before == Duration::from_millis(2500) && batch.count == 1));
    }

    #[test]
    fn stair_step_adds_users_per_step_up_to_the_cap() {
        let profile = LoadProfile::StairStep {
            initial_users: 2,
            step_users: 3,
            step_duration_secs: 10,
        };
        let plan = launch_plan(&profile, 7, 60);
        assert_eq!(
            plan,
            vec![
                LaunchBatch {
                    delay_before: Duration::ZERO,
                    count: 2
                },
                LaunchBatch {
                    delay_before: secs(10),
                    count: 3
                },
                LaunchBatch {
                    delay_before: secs(10),
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn stair_step_steps_are_bounded_by_duration() {
        let profile = LoadProfile::StairStep {
            initial_users: 1,
            step_users: 1,
            step_duration_secs: 20,
        };
        let plan = launch_plan(&profile, 100, 50);
        let total: u32 = plan.iter().map(|batch| batch.count).sum();
        assert_eq!(plan.len(), 3);
        assert_eq!(total, 3);
    }

    #[test]
    fn collector_snapshots_are_independent_copies() {
        let collector = SampleCollector::<ResourceSample>::new();
        collector.on_resource(ResourceSample {
            timestamp_ms: 1,
            cpu: 10.0,
            memory: 20.0,
        });
        let snapshot = collector.snapshot();
        collector.push(ResourceSample {
            timestamp_ms: 2,
            cpu: 11.0,
            memory: 21.0,
        });
        assert_eq!(snapshot.len(), 1);
        assert_eq!(collector.len(), 2);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_running() {
        let config = LoadTestConfig::new("", 1, RunMode::Iterations { iterations: 1 });
        let result = run_load_test(
            config,
            |_sample: TestResultSample| {},
            |_sample: ResourceSample| {},
            StopSignal::new(),
            StopSignal::new(),
        )
        .await;
        assert!(matches!(result, Err(LoadTestError::Config(_))));
    }

    #[tokio::test]
    async fn pre_tripped_soft_stop_completes_without_samples() {
        let config = LoadTestConfig::new(
            "http://127.0.0.1:9/",
            3,
            RunMode::Iterations { iterations: 10 },
        );
        let test = LoadTest::new(config).unwrap();
        let states = test.subscribe();
        let collector = SampleCollector::<TestResultSample>::new();
        let soft = StopSignal::new();
        soft.trip();

        test.run(
            collector.clone(),
            |_sample: ResourceSample| {},
            soft,
            StopSignal::new(),
        )
        .await
        .unwrap();

        assert!(collector.is_empty());
        assert_eq!(*states.borrow(), RunState::Completed);
    }
}
