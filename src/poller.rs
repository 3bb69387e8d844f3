use crate::collectors::{LiveSource, Sampler};
use crate::metrics::{now_unix, Metrics};
use crate::state::SharedState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollLoopState {
    Stopped,
    Running,
}

/// Handle used by the display layer to pause and resume polling.
#[derive(Clone)]
pub struct PollControl {
    enabled: Arc<watch::Sender<bool>>,
    metrics: Arc<Metrics>,
}

impl PollControl {
    pub fn pause(&self) -> PollLoopState {
        self.set_running(false)
    }

    pub fn resume(&self) -> PollLoopState {
        self.set_running(true)
    }

    pub fn state(&self) -> PollLoopState {
        if *self.enabled.borrow() {
            PollLoopState::Running
        } else {
            PollLoopState::Stopped
        }
    }

    fn set_running(&self, running: bool) -> PollLoopState {
        let changed = self.enabled.send_if_modified(|current| {
            if *current == running {
                false
            } else {
                *current = running;
                true
            }
        });
        if changed {
            info!(running, "poll state changed");
        }
        self.metrics.set_poll_running(running);
        self.state()
    }
}

enum Step {
    Tick,
    Toggled,
    Shutdown,
}

/// Timer-driven poll loop. Every tick is spawned on its own, so a slow live
/// source delays only that tick's sample; completions are recorded in the
/// order they finish.
pub struct PollLoop<S> {
    sampler: Sampler<S>,
    state: SharedState,
    metrics: Arc<Metrics>,
    interval: Duration,
    enabled: watch::Receiver<bool>,
    seq: u64,
}

impl<S: LiveSource> PollLoop<S> {
    pub fn new(
        sampler: Sampler<S>,
        state: SharedState,
        metrics: Arc<Metrics>,
        interval: Duration,
        start_running: bool,
    ) -> (Self, PollControl) {
        let (tx, rx) = watch::channel(start_running);
        metrics.set_poll_running(start_running);
        let control = PollControl {
            enabled: Arc::new(tx),
            metrics: metrics.clone(),
        };
        let poll = Self {
            sampler,
            state,
            metrics,
            interval,
            enabled: rx,
            seq: 0,
        };
        (poll, control)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *self.enabled.borrow_and_update() {
                if !self.run_until_paused(&mut shutdown).await {
                    break;
                }
                continue;
            }

            let step = tokio::select! {
                _ = shutdown.changed() => Step::Shutdown,
                res = self.enabled.changed() => match res {
                    Ok(()) => Step::Toggled,
                    Err(_) => Step::Shutdown,
                },
            };
            if let Step::Shutdown = step {
                break;
            }
        }
        info!("poll loop stopped");
    }

    /// Ticks until the run flag changes (`true`) or shutdown (`false`). The
    /// first tick fires one full interval after entry; missed ticks are
    /// skipped. Any change of the flag ends this interval, so a pause and
    /// resume merged into one notification still restarts it.
    async fn run_until_paused(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "poll loop running"
        );

        loop {
            let step = tokio::select! {
                _ = shutdown.changed() => Step::Shutdown,
                res = self.enabled.changed() => match res {
                    Ok(()) => Step::Toggled,
                    Err(_) => Step::Shutdown,
                },
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Tick => self.spawn_tick(),
                Step::Toggled => {
                    if !*self.enabled.borrow() {
                        info!("poll loop paused");
                    }
                    return true;
                }
                Step::Shutdown => return false,
            }
        }
    }

    fn spawn_tick(&mut self) {
        self.seq += 1;
        let seq = self.seq;
        let sampler = self.sampler.clone();
        let state = self.state.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            run_tick(&sampler, &state, &metrics, seq).await;
        });
    }
}

/// One acquisition: sample, then record into shared state.
pub async fn run_tick<S: LiveSource>(
    sampler: &Sampler<S>,
    state: &SharedState,
    metrics: &Metrics,
    seq: u64,
) {
    let acquired = sampler.sample(clock_label()).await;
    let mode = acquired.mode();
    let timestamp = acquired.sample().timestamp.clone();

    let mut guard = state.write().await;
    guard.record(acquired, now_unix());
    metrics.inc_sample(mode);
    metrics.update_from_state(&guard);
    debug!(
        seq,
        mode = mode.label(),
        %timestamp,
        history_len = guard.history.len(),
        "sample recorded"
    );
}

/// Local wall-clock time as `HH:MM:SS`, 24-hour.
pub fn clock_label() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::ScriptedSource;
    use crate::collectors::{LiveReading, SourceError};
    use crate::state::{SourceMode, State};
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct GatedSource {
        gate: Arc<Notify>,
        calls: Arc<AtomicUsize>,
    }

    impl LiveSource for GatedSource {
        async fn fetch(&self) -> Result<LiveReading, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Err(SourceError::Status(StatusCode::GATEWAY_TIMEOUT))
        }
    }

    fn setup<S: LiveSource>(
        source: S,
        start_running: bool,
    ) -> (PollLoop<S>, PollControl, SharedState) {
        let metrics = Metrics::new().expect("metrics registry");
        let state = State::new(0, 30).shared();
        let (poll, control) = PollLoop::new(
            Sampler::new(source),
            state.clone(),
            metrics,
            Duration::from_millis(1000),
            start_running,
        );
        (poll, control, state)
    }

    async fn history_len(state: &SharedState) -> usize {
        state.read().await.history.len()
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_appends_and_resume_restarts_interval() {
        let (poll, control, state) = setup(ScriptedSource::failing(), true);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(poll.run(shutdown_rx));

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(history_len(&state).await, 3);
        assert_eq!(state.read().await.mode, SourceMode::Simulation);

        assert_eq!(control.pause(), PollLoopState::Stopped);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(history_len(&state).await, 3);

        assert_eq!(control.resume(), PollLoopState::Running);
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(history_len(&state).await, 3, "missed ticks must not be replayed");
        time::sleep(Duration::from_millis(600)).await;
        assert_eq!(history_len(&state).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_in_one_tick_restart_interval() {
        let (poll, control, state) = setup(ScriptedSource::failing(), true);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(poll.run(shutdown_rx));

        time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(history_len(&state).await, 1);

        control.pause();
        control.resume();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(history_len(&state).await, 1, "old 2.0s tick must not fire");
        time::sleep(Duration::from_millis(900)).await;
        assert_eq!(history_len(&state).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn starts_stopped_when_requested() {
        let (poll, control, state) = setup(ScriptedSource::failing(), false);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(poll.run(shutdown_rx));

        assert_eq!(control.state(), PollLoopState::Stopped);
        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(history_len(&state).await, 0);
        assert_eq!(state.read().await.mode, SourceMode::Connecting);

        control.resume();
        time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(history_len(&state).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_then_resume_is_idempotent() {
        let (poll, control, state) = setup(ScriptedSource::failing(), true);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(poll.run(shutdown_rx));

        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(history_len(&state).await, 2);

        control.pause();
        control.pause();
        control.resume();
        control.resume();
        assert_eq!(control.state(), PollLoopState::Running);

        time::sleep(Duration::from_millis(1000)).await;
        assert!(history_len(&state).await >= 2);
        time::sleep(Duration::from_secs(2)).await;
        assert!(history_len(&state).await >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_timer_driven_and_survive_pause() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let source = GatedSource {
            gate: gate.clone(),
            calls: calls.clone(),
        };
        let (poll, control, state) = setup(source, true);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(poll.run(shutdown_rx));

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(history_len(&state).await, 0);

        control.pause();
        gate.notify_waiters();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(history_len(&state).await, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_loop() {
        let (poll, _control, _state) = setup(ScriptedSource::failing(), true);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poll.run(shutdown_rx));

        time::sleep(Duration::from_millis(1500)).await;
        let _ = shutdown_tx.send(true);
        task.await.expect("poll loop task");
    }

    #[tokio::test]
    async fn tick_records_live_sample_and_mode() {
        let metrics = Metrics::new().expect("metrics registry");
        let state = State::new(0, 30).shared();
        let sampler = Sampler::new(ScriptedSource::answering(LiveReading {
            cpu: 10.0,
            memory: 20.0,
            disk: 30.0,
            network: 40.0,
            timestamp: Some("12:00:00".to_string()),
        }));

        run_tick(&sampler, &state, &metrics, 1).await;

        let guard = state.read().await;
        assert_eq!(guard.mode, SourceMode::Live);
        let latest = guard.history.latest().expect("sample recorded");
        assert_eq!(latest.timestamp, "12:00:00");
        assert_eq!(latest.cpu, 10.0);
    }

    #[test]
    fn clock_label_is_24h_hh_mm_ss() {
        let label = clock_label();
        let parts: Vec<&str> = label.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 2));
        let hours: u32 = parts[0].parse().unwrap();
        assert!(hours < 24);
    }
}
