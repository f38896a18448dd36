use cast_proto::snapshot::PlaybackSnapshot;
use tokio::sync::watch;

/// A published snapshot together with the publish counter at the time it
/// was written.  Both change in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSnapshot {
    pub rev: u64,
    pub snapshot: PlaybackSnapshot,
}

/// Single-slot, last-value-wins holder of the latest [`PlaybackSnapshot`].
///
/// Readers always see a whole snapshot: the slot is replaced, never edited
/// field by field.  The `playing` flag lives beside it and is only changed by
/// explicit pause toggles and by `reset()`.
pub struct StatePublisher {
    slot: watch::Sender<PublishedSnapshot>,
    playing: watch::Sender<bool>,
}

impl StatePublisher {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(PublishedSnapshot {
            rev: 0,
            snapshot: PlaybackSnapshot::stopped(),
        });
        let (playing, _) = watch::channel(true);
        Self { slot, playing }
    }

    pub fn publish(&self, snapshot: PlaybackSnapshot) {
        self.slot.send_modify(|slot| {
            slot.rev += 1;
            slot.snapshot = snapshot;
        });
    }

    /// Back to `{0, 0, "stopped"}` with `playing = true`.
    pub fn reset(&self) {
        self.publish(PlaybackSnapshot::stopped());
        self.playing.send_replace(true);
    }

    pub fn current(&self) -> PlaybackSnapshot {
        self.slot.borrow().snapshot.clone()
    }

    pub fn published(&self) -> PublishedSnapshot {
        self.slot.borrow().clone()
    }

    /// Number of publishes so far, including resets.
    pub fn revision(&self) -> u64 {
        self.slot.borrow().rev
    }

    pub fn subscribe(&self) -> watch::Receiver<PublishedSnapshot> {
        self.slot.subscribe()
    }

    pub fn playing(&self) -> bool {
        *self.playing.borrow()
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.send_replace(playing);
    }

    pub fn subscribe_playing(&self) -> watch::Receiver<bool> {
        self.playing.subscribe()
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}
