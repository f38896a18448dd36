#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cast_daemon::engine::EngineGateway;
use cast_daemon::presence::{MemorySink, PresenceNotifier};
use cast_daemon::publisher::StatePublisher;
use cast_daemon::supervisor::SupervisorTiming;
use cast_daemon::CastController;
use cast_proto::config::VolumeConfig;
use cast_proto::snapshot::SessionTarget;
use tokio::time::Instant;

/// Every call the supervisor or controller makes, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    StartSession(SessionTarget),
    QueryProgress,
    QueryTotal,
    QueryTitle,
    Next,
    TogglePause,
    Seek(i64),
    SetVolume(i64),
    QueryVolume,
    ResetSession,
    StopSession,
}

struct Track {
    current: i64,
    total: i64,
    title: String,
}

struct Inner {
    track: Track,
    /// Track the engine switches to on `next`, if any.
    after_next: VecDeque<Track>,
    playing: bool,
    volume: i64,
    /// `query_volume` answers `-1` this many times before the real value.
    volume_misses: u32,
    seek_fails: bool,
    calls: Vec<(Instant, Call)>,
}

/// Engine double: answers from a scripted track and records calls with the
/// (virtual) time they happened.
pub struct ScriptedEngine {
    inner: Mutex<Inner>,
    origin: Instant,
}

impl ScriptedEngine {
    pub fn new(current: i64, total: i64, title: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                track: Track {
                    current,
                    total,
                    title: title.to_string(),
                },
                after_next: VecDeque::new(),
                playing: true,
                volume: 50,
                volume_misses: 0,
                seek_fails: false,
                calls: Vec::new(),
            }),
            origin: Instant::now(),
        })
    }

    pub fn set_reading(&self, current: i64, total: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.track.current = current;
        inner.track.total = total;
    }

    pub fn queue_next_track(&self, current: i64, total: i64, title: &str) {
        self.inner.lock().unwrap().after_next.push_back(Track {
            current,
            total,
            title: title.to_string(),
        });
    }

    pub fn set_volume_misses(&self, misses: u32) {
        self.inner.lock().unwrap().volume_misses = misses;
    }

    pub fn set_seek_fails(&self, fails: bool) {
        self.inner.lock().unwrap().seek_fails = fails;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Offsets from engine creation at which `call` happened.
    pub fn times_of(&self, call: &Call) -> Vec<Duration> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(_, c)| c == call)
            .map(|(at, _)| at.duration_since(self.origin))
            .collect()
    }

    fn record(&self, call: Call) {
        self.inner
            .lock()
            .unwrap()
            .calls
            .push((Instant::now(), call));
    }
}

#[async_trait]
impl EngineGateway for ScriptedEngine {
    async fn start_session(&self, target: &SessionTarget) {
        self.record(Call::StartSession(target.clone()));
    }

    async fn query_progress(&self) -> i64 {
        self.record(Call::QueryProgress);
        self.inner.lock().unwrap().track.current
    }

    async fn query_total_duration(&self) -> i64 {
        self.record(Call::QueryTotal);
        self.inner.lock().unwrap().track.total
    }

    async fn query_title(&self) -> String {
        self.record(Call::QueryTitle);
        self.inner.lock().unwrap().track.title.clone()
    }

    async fn issue_next(&self) {
        self.record(Call::Next);
        let mut inner = self.inner.lock().unwrap();
        if let Some(track) = inner.after_next.pop_front() {
            inner.track = track;
        }
    }

    async fn issue_toggle_pause(&self) -> i64 {
        self.record(Call::TogglePause);
        let mut inner = self.inner.lock().unwrap();
        inner.playing = !inner.playing;
        i64::from(inner.playing)
    }

    async fn issue_seek(&self, target_secs: i64) -> i64 {
        self.record(Call::Seek(target_secs));
        let mut inner = self.inner.lock().unwrap();
        if inner.seek_fails || target_secs < 0 || target_secs > inner.track.total {
            return -1;
        }
        inner.track.current = target_secs;
        target_secs
    }

    async fn issue_set_volume(&self, target: i64) -> i64 {
        self.record(Call::SetVolume(target));
        let mut inner = self.inner.lock().unwrap();
        inner.volume = target;
        target
    }

    async fn query_volume(&self) -> i64 {
        self.record(Call::QueryVolume);
        let mut inner = self.inner.lock().unwrap();
        if inner.volume_misses > 0 {
            inner.volume_misses -= 1;
            return -1;
        }
        inner.volume
    }

    async fn reset_session(&self) {
        self.record(Call::ResetSession);
    }

    async fn stop_session(&self) {
        self.record(Call::StopSession);
    }
}

pub struct Harness {
    pub engine: Arc<ScriptedEngine>,
    pub sink: Arc<MemorySink>,
    pub controller: Arc<CastController>,
}

pub fn harness(engine: Arc<ScriptedEngine>, timing: SupervisorTiming) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let controller = Arc::new(CastController::new(
        engine.clone(),
        Arc::new(StatePublisher::new()),
        Arc::new(PresenceNotifier::new(sink.clone())),
        timing,
        VolumeConfig::default(),
    ));
    Harness {
        engine,
        sink,
        controller,
    }
}

/// 1000 ms ticks after a 2000 ms initial delay.
pub fn conservative() -> SupervisorTiming {
    SupervisorTiming {
        tick_interval: Duration::from_millis(1000),
        initial_delay: Duration::from_millis(2000),
    }
}

pub fn target(room: &str) -> SessionTarget {
    SessionTarget::new("http://192.168.1.5:8080", room, "http://192.168.1.20:49152/desc.xml")
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Sleep on the paused clock until `offset` after `origin`.
pub async fn advance_to(origin: Instant, offset: Duration) {
    tokio::time::sleep_until(origin + offset).await;
}
