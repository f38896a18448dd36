use serde::{Deserialize, Serialize};

/// Title reported by the engine when it has nothing better.
pub const UNKNOWN_TITLE: &str = "unknown";

/// Title carried by the snapshot after a session is torn down.
pub const STOPPED_TITLE: &str = "stopped";

/// Latest progress reading taken from the engine.
///
/// `current_secs < 0` or `total_secs <= 0` means "no reliable data"; such a
/// snapshot is still published so observers see the raw state, but it never
/// counts as real progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub current_secs: i64,
    pub total_secs: i64,
    pub title: String,
}

impl PlaybackSnapshot {
    pub fn new(current_secs: i64, total_secs: i64, title: impl Into<String>) -> Self {
        Self {
            current_secs,
            total_secs,
            title: title.into(),
        }
    }

    /// `{0, 0, "stopped"}`: the value before the first start and after every
    /// stop/reset.
    pub fn stopped() -> Self {
        Self::new(0, 0, STOPPED_TITLE)
    }

    pub fn is_valid(&self) -> bool {
        self.current_secs >= 0 && self.total_secs > 0
    }

    /// Seconds left in the track, only when the reading is valid.
    pub fn remaining_secs(&self) -> Option<i64> {
        self.is_valid().then(|| self.total_secs - self.current_secs)
    }
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self::stopped()
    }
}

/// Which engine session a supervisor run controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTarget {
    pub base_url: String,
    pub room_id: String,
    pub device_location: String,
}

impl SessionTarget {
    pub fn new(
        base_url: impl Into<String>,
        room_id: impl Into<String>,
        device_location: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            room_id: room_id.into(),
            device_location: device_location.into(),
        }
    }
}

/// Phase of a single supervisor run.
///
/// Transitions:
///   Idle -> Polling -> CommandCooldown -> Polling ... -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SupervisorRunState {
    #[default]
    Idle,
    Polling,
    CommandCooldown,
    Stopped,
}

impl SupervisorRunState {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SupervisorRunState::Polling | SupervisorRunState::CommandCooldown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_snapshot_is_not_valid() {
        let snap = PlaybackSnapshot::stopped();
        assert_eq!(snap, PlaybackSnapshot::new(0, 0, "stopped"));
        assert!(!snap.is_valid());
        assert_eq!(snap.remaining_secs(), None);
    }

    #[test]
    fn validity_requires_known_progress_and_positive_total() {
        assert!(PlaybackSnapshot::new(0, 200, "a").is_valid());
        assert!(!PlaybackSnapshot::new(-1, 200, "a").is_valid());
        assert!(!PlaybackSnapshot::new(10, 0, "a").is_valid());
        assert!(!PlaybackSnapshot::new(10, -1, "a").is_valid());
        assert_eq!(
            PlaybackSnapshot::new(199, 200, "a").remaining_secs(),
            Some(1)
        );
    }
}
