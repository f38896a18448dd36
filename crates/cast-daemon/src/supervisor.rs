use std::sync::Arc;
use std::time::Duration;

use cast_proto::config::SupervisorConfig;
use cast_proto::snapshot::{PlaybackSnapshot, SupervisorRunState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::EngineGateway;
use crate::publisher::StatePublisher;

/// Advance once this many seconds or fewer are left in the track.
pub const END_WINDOW_SECS: i64 = 2;

/// Never advance at or before this position; a just-started or not yet
/// synced track can briefly look like it is about to end.
pub const NEW_TRACK_GUARD_SECS: i64 = 5;

/// Dead time after an advance, long enough for the engine to switch tracks
/// and start reporting the new one.
pub const ADVANCE_COOLDOWN: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTiming {
    pub tick_interval: Duration,
    /// Wait before the first tick so a fresh session can come up.
    pub initial_delay: Duration,
}

impl SupervisorTiming {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.effective_tick_interval_ms()),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
        }
    }
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

/// End-of-track rule.  Only valid readings are considered.
pub fn should_advance(snapshot: &PlaybackSnapshot) -> bool {
    match snapshot.remaining_secs() {
        Some(remaining) => {
            remaining <= END_WINDOW_SECS && snapshot.current_secs > NEW_TRACK_GUARD_SECS
        }
        None => false,
    }
}

/// One polling run.  Consumed by [`Supervisor::run`]; a new session gets a
/// new supervisor.
///
/// A condition that is still true after a cooldown fires again: a stuck
/// engine gets another `next` rather than being given up on.
pub struct Supervisor {
    engine: Arc<dyn EngineGateway>,
    publisher: Arc<StatePublisher>,
    timing: SupervisorTiming,
    state: Arc<watch::Sender<SupervisorRunState>>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        engine: Arc<dyn EngineGateway>,
        publisher: Arc<StatePublisher>,
        timing: SupervisorTiming,
        state: Arc<watch::Sender<SupervisorRunState>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            publisher,
            timing,
            state,
            cancel,
        }
    }

    pub async fn run(self) {
        info!(
            "supervisor: loop start (tick={:?}, initial delay={:?})",
            self.timing.tick_interval, self.timing.initial_delay
        );
        self.state.send_replace(SupervisorRunState::Polling);

        if self.wait(self.timing.initial_delay).await {
            self.poll_until_cancelled().await;
        }

        self.state.send_replace(SupervisorRunState::Stopped);
        info!("supervisor: loop exit");
    }

    async fn poll_until_cancelled(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let snapshot = self.poll().await;
            if self.cancel.is_cancelled() {
                return;
            }
            let advance = should_advance(&snapshot);
            if advance {
                info!(
                    "supervisor: {}s left of {:?}, advancing",
                    snapshot.total_secs - snapshot.current_secs,
                    snapshot.title
                );
            }
            self.publisher.publish(snapshot);

            if advance {
                self.engine.issue_next().await;
                self.state.send_replace(SupervisorRunState::CommandCooldown);
                if !self.wait(ADVANCE_COOLDOWN).await {
                    return;
                }
                self.state.send_replace(SupervisorRunState::Polling);
            }

            if !self.wait(self.timing.tick_interval).await {
                return;
            }
        }
    }

    async fn poll(&self) -> PlaybackSnapshot {
        let current = self.engine.query_progress().await;
        let total = self.engine.query_total_duration().await;
        let title = self.engine.query_title().await;
        debug!("supervisor: progress {} / {} ({:?})", current, total, title);
        PlaybackSnapshot::new(current, total, title)
    }

    /// Sleep unless cancelled first.  Returns `false` on cancellation.
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
