//! Call boundary to the external playback engine.
//!
//! The engine is opaque: it serves the audio, speaks the casting protocol to
//! the device and tracks the playlist.  We only see the fixed command/query
//! set below.  Nothing here makes decisions and nothing is retried; failures
//! come back as sentinel values and the caller decides what to do.

mod ipc;

pub use ipc::IpcEngine;

use async_trait::async_trait;
use cast_proto::snapshot::SessionTarget;

/// Returned by progress, seek, volume and pause queries when the engine has
/// no answer.
pub const SENTINEL_FAILED: i64 = -1;

/// `issue_toggle_pause` result meaning playback is now running.
pub const TOGGLE_PLAYING: i64 = 1;
/// `issue_toggle_pause` result meaning playback is now paused.
pub const TOGGLE_PAUSED: i64 = 0;

#[async_trait]
pub trait EngineGateway: Send + Sync {
    /// Initialise the engine for `target`.  Fire-and-forget; a session that
    /// never comes up shows only as sentinel readings.
    async fn start_session(&self, target: &SessionTarget);

    /// Current position in seconds, `-1` when unknown.
    async fn query_progress(&self) -> i64;

    /// Track length in seconds, `<= 0` when unknown.
    async fn query_total_duration(&self) -> i64;

    /// Best-effort track title; a placeholder when unknown.
    async fn query_title(&self) -> String;

    async fn issue_next(&self);

    /// `1` now playing, `0` now paused, `-1` failure.
    async fn issue_toggle_pause(&self) -> i64;

    /// New position, or `-1`.
    async fn issue_seek(&self, target_secs: i64) -> i64;

    /// New volume (0..=100), or `-1`.
    async fn issue_set_volume(&self, target: i64) -> i64;

    /// Current volume (0..=100), or `-1`.
    async fn query_volume(&self) -> i64;

    /// Drop all session state held by the engine.
    async fn reset_session(&self);

    async fn stop_session(&self);
}
