use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cast_proto::config::VolumeConfig;
use cast_proto::protocol::CastState;
use cast_proto::snapshot::{SessionTarget, SupervisorRunState};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{EngineGateway, SENTINEL_FAILED, TOGGLE_PAUSED, TOGGLE_PLAYING};
use crate::error::{CastError, Result};
use crate::presence::{PresenceNotifier, PREPARING_TEXT};
use crate::publisher::StatePublisher;
use crate::supervisor::{Supervisor, SupervisorTiming};

/// The supervisor and presence tasks of one session, cancelled together.
struct ActiveRun {
    target: SessionTarget,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
    presence: JoinHandle<()>,
}

impl ActiveRun {
    /// Cancel and wait until both tasks have fully exited.
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.supervisor.await {
            warn!("controller: supervisor task ended abnormally: {}", e);
        }
        if let Err(e) = self.presence.await {
            warn!("controller: presence task ended abnormally: {}", e);
        }
    }
}

/// Owns the session lifecycle: at most one supervisor run exists at a time,
/// and a run is never torn down without resetting the published state and
/// the notification with it.
pub struct CastController {
    engine: Arc<dyn EngineGateway>,
    publisher: Arc<StatePublisher>,
    notifier: Arc<PresenceNotifier>,
    timing: SupervisorTiming,
    volume: VolumeConfig,
    run_state: Arc<watch::Sender<SupervisorRunState>>,
    active: Mutex<Option<ActiveRun>>,
    /// Last volume the engine confirmed, `-1` when unknown.
    last_volume: AtomicI64,
}

impl CastController {
    pub fn new(
        engine: Arc<dyn EngineGateway>,
        publisher: Arc<StatePublisher>,
        notifier: Arc<PresenceNotifier>,
        timing: SupervisorTiming,
        volume: VolumeConfig,
    ) -> Self {
        let (run_state, _) = watch::channel(SupervisorRunState::Idle);
        Self {
            engine,
            publisher,
            notifier,
            timing,
            volume,
            run_state: Arc::new(run_state),
            active: Mutex::new(None),
            last_volume: AtomicI64::new(SENTINEL_FAILED),
        }
    }

    pub fn publisher(&self) -> &Arc<StatePublisher> {
        &self.publisher
    }

    pub fn notifier(&self) -> &Arc<PresenceNotifier> {
        &self.notifier
    }

    pub fn run_state(&self) -> SupervisorRunState {
        *self.run_state.borrow()
    }

    pub fn subscribe_run_state(&self) -> watch::Receiver<SupervisorRunState> {
        self.run_state.subscribe()
    }

    pub async fn target(&self) -> Option<SessionTarget> {
        self.active.lock().await.as_ref().map(|run| run.target.clone())
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Full observer view: snapshot, playing flag and run phase.
    pub async fn cast_state(&self) -> CastState {
        let published = self.publisher.published();
        CastState {
            rev: published.rev,
            snapshot: published.snapshot,
            playing: self.publisher.playing(),
            run_state: self.run_state(),
            device_location: self.target().await.map(|t| t.device_location),
        }
    }

    // ── lifecycle ─────────────────────────────────────────────────────────────

    /// Begin controlling `target`.  Any previous run is cancelled and fully
    /// drained first.
    pub async fn start(&self, target: SessionTarget) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(
                "controller: replacing session on {}",
                previous.target.device_location
            );
            previous.shutdown().await;
        }

        self.publisher.reset();
        self.run_state.send_replace(SupervisorRunState::Idle);
        self.last_volume.store(SENTINEL_FAILED, Ordering::Relaxed);

        info!(
            "controller: starting session base_url={} room={} device={}",
            target.base_url, target.room_id, target.device_location
        );
        self.engine.start_session(&target).await;
        self.notifier.show(PREPARING_TEXT).await;

        let cancel = CancellationToken::new();

        let presence = {
            let notifier = self.notifier.clone();
            let rx = self.publisher.subscribe();
            let cancel = cancel.clone();
            tokio::spawn(async move { notifier.follow(rx, cancel).await })
        };

        let supervisor = Supervisor::new(
            self.engine.clone(),
            self.publisher.clone(),
            self.timing,
            self.run_state.clone(),
            cancel.clone(),
        );
        let supervisor = tokio::spawn(supervisor.run());

        *active = Some(ActiveRun {
            target,
            cancel,
            supervisor,
            presence,
        });
    }

    /// Cancel the run, reset published state and remove the notification.
    /// Safe to call in any state.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        self.teardown(active.take()).await;
    }

    /// `stop()` plus telling the engine to discard the session entirely.
    pub async fn reset(&self) {
        let mut active = self.active.lock().await;
        self.teardown(active.take()).await;
        self.engine.reset_session().await;
    }

    /// Process exit: tear down and release the engine session.
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        self.teardown(active.take()).await;
        self.engine.stop_session().await;
    }

    async fn teardown(&self, run: Option<ActiveRun>) {
        match run {
            Some(run) => {
                info!(
                    "controller: stopping session on {}",
                    run.target.device_location
                );
                run.shutdown().await;
            }
            None => debug!("controller: stop requested with no active session"),
        }
        self.publisher.reset();
        self.notifier.clear().await;
    }

    // ── one-shot commands ─────────────────────────────────────────────────────

    async fn require_session(&self) -> Result<()> {
        if self.is_active().await {
            Ok(())
        } else {
            Err(CastError::NoSession)
        }
    }

    /// Returns whether playback is running afterwards.
    pub async fn toggle_pause(&self) -> Result<bool> {
        self.require_session().await?;
        match self.engine.issue_toggle_pause().await {
            TOGGLE_PLAYING => {
                self.publisher.set_playing(true);
                Ok(true)
            }
            TOGGLE_PAUSED => {
                self.publisher.set_playing(false);
                Ok(false)
            }
            other => {
                warn!("controller: toggle_pause returned {}", other);
                Err(CastError::CommandFailed {
                    command: "toggle_pause",
                })
            }
        }
    }

    /// Manual skip.  Fire-and-forget like the automatic one.
    pub async fn next(&self) -> Result<()> {
        self.require_session().await?;
        info!("controller: manual next");
        self.engine.issue_next().await;
        Ok(())
    }

    /// Seek on a separate short-lived task.  Returns the new position.  The
    /// target goes to the engine as given; out-of-range targets are for the
    /// engine to refuse.
    pub async fn seek(&self, target_secs: i64) -> Result<i64> {
        self.require_session().await?;
        let engine = self.engine.clone();
        let position = tokio::spawn(async move { engine.issue_seek(target_secs).await }).await?;
        debug!("controller: seek result {} at {}s", position, target_secs);
        if position < 0 {
            return Err(CastError::CommandFailed { command: "seek" });
        }
        Ok(position)
    }

    /// Set the device volume (clamped to 0..=100) on a separate task.
    pub async fn set_volume(&self, target: i64) -> Result<u8> {
        self.require_session().await?;
        let target = target.clamp(0, 100);
        let engine = self.engine.clone();
        let volume = tokio::spawn(async move { engine.issue_set_volume(target).await }).await?;
        self.accept_volume(volume)
            .ok_or(CastError::CommandFailed {
                command: "set_volume",
            })
    }

    /// Step the volume from the last known level, e.g. `+5` / `-5`.
    pub async fn nudge_volume(&self, delta: i64) -> Result<u8> {
        let base = match self.last_volume.load(Ordering::Relaxed) {
            v if v >= 0 => v,
            _ => i64::from(self.get_volume().await?),
        };
        self.set_volume(base + delta).await
    }

    /// Default `nudge_volume` step from config.
    pub fn volume_step(&self) -> i64 {
        i64::from(self.volume.step)
    }

    pub async fn get_volume(&self) -> Result<u8> {
        self.require_session().await?;
        let engine = self.engine.clone();
        let volume = tokio::spawn(async move { engine.query_volume().await }).await?;
        self.accept_volume(volume).ok_or(CastError::VolumeUnavailable)
    }

    /// Read the volume right after connecting, when the device may not have
    /// answered yet: retry a few times, first real reading wins.
    pub async fn get_volume_with_retry(&self) -> Result<u8> {
        let attempts = self.volume.read_attempts.max(1);
        let interval = Duration::from_millis(self.volume.read_interval_ms);
        for attempt in 1..=attempts {
            match self.get_volume().await {
                Ok(volume) => return Ok(volume),
                Err(CastError::VolumeUnavailable) => {
                    debug!("controller: volume read {}/{} got nothing", attempt, attempts);
                }
                Err(e) => return Err(e),
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Err(CastError::VolumeUnavailable)
    }

    fn accept_volume(&self, volume: i64) -> Option<u8> {
        if volume < 0 {
            return None;
        }
        let volume = volume.min(100);
        self.last_volume.store(volume, Ordering::Relaxed);
        u8::try_from(volume).ok()
    }
}
