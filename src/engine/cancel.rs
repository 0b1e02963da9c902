use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One-shot, monotonic stop signal. Once tripped it stays tripped.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.token.cancel();
    }

    pub fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn tripped(&self) {
        self.token.cancelled().await;
    }

    /// A signal that trips with this one but can also be tripped on its own
    /// without affecting the parent.
    pub fn child(&self) -> StopSignal {
        StopSignal {
            token: self.token.child_token(),
        }
    }

    /// Runs `callback` once this signal trips. Aborting the returned handle
    /// unregisters the callback.
    pub fn on_trip<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            callback();
        })
    }
}

/// The soft/hard pair that drives graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct StopSignals {
    pub soft: StopSignal,
    pub hard: StopSignal,
}

impl StopSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit user stop: no new iterations and abort in-flight requests.
    pub fn stop_now(&self) {
        self.soft.trip();
        self.hard.trip();
    }

    /// Trips hard-stop `grace` after soft-stop trips.
    pub fn schedule_hard_stop(&self, grace: Duration) -> JoinHandle<()> {
        schedule_hard_stop(&self.soft, &self.hard, grace)
    }
}

pub(crate) fn schedule_hard_stop(
    soft: &StopSignal,
    hard: &StopSignal,
    grace: Duration,
) -> JoinHandle<()> {
    let soft = soft.clone();
    let hard = hard.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = soft.tripped() => {}
            _ = hard.tripped() => return,
        }
        tokio::select! {
            _ = tokio::time::sleep(grace) => {
                if !hard.is_tripped() {
                    tracing::info!(grace_secs = grace.as_secs_f64(), "grace period elapsed, aborting in-flight requests");
                }
                hard.trip();
            }
            _ = hard.tripped() => {}
        }
    })
}

/// Sleeps for `duration` unless `stop` trips first. Returns `false` when cut short.
pub async fn pause(duration: Duration, stop: &StopSignal) -> bool {
    if stop.is_tripped() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = stop.tripped() => false,
    }
}
