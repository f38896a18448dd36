use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cast_proto::snapshot::PlaybackSnapshot;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::publisher::PublishedSnapshot;
use crate::BroadcastMessage;

/// The one notification id we ever post under.
pub const PRESENCE_NOTIFICATION_ID: u32 = 1;

pub const NOTIFICATION_TITLE: &str = "KTV cast";

/// Shown from session start until the first valid reading.
pub const PREPARING_TEXT: &str = "preparing to cast...";

/// `mm:ss`, with anything negative shown as `00:00`.
pub fn format_time(secs: i64) -> String {
    if secs < 0 {
        return "00:00".to_string();
    }
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Status line for `snapshot`.  `seen_valid` says whether this run has had a
/// valid reading yet.
pub fn render(snapshot: &PlaybackSnapshot, seen_valid: bool) -> String {
    if !seen_valid {
        PREPARING_TEXT.to_string()
    } else if snapshot.total_secs > 0 {
        format!(
            "{} ({}/{})",
            snapshot.title,
            format_time(snapshot.current_secs),
            format_time(snapshot.total_secs)
        )
    } else {
        format!("currently playing: {}", snapshot.title)
    }
}

/// Where the persistent notification is shown.  `post` replaces whatever is
/// under `id`.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post(&self, id: u32, title: &str, text: &str);
    async fn cancel(&self, id: u32);
}

/// Keeps the persistent notification in step with the published snapshot.
pub struct PresenceNotifier {
    sink: Arc<dyn NotificationSink>,
    last_text: Mutex<Option<String>>,
}

impl PresenceNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            last_text: Mutex::new(None),
        }
    }

    /// Text currently on screen, `None` when cleared.
    pub fn last_text(&self) -> Option<String> {
        self.last_text.lock().ok().and_then(|t| t.clone())
    }

    pub async fn show(&self, text: &str) {
        if let Ok(mut last) = self.last_text.lock() {
            *last = Some(text.to_string());
        }
        self.sink
            .post(PRESENCE_NOTIFICATION_ID, NOTIFICATION_TITLE, text)
            .await;
    }

    pub async fn clear(&self) {
        if let Ok(mut last) = self.last_text.lock() {
            *last = None;
        }
        self.sink.cancel(PRESENCE_NOTIFICATION_ID).await;
    }

    /// Re-render on every publish until `cancel` fires.  The value already in
    /// the slot when this starts is skipped.
    pub async fn follow(
        &self,
        mut rx: watch::Receiver<PublishedSnapshot>,
        cancel: CancellationToken,
    ) {
        let _ = rx.borrow_and_update();
        let mut seen_valid = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let snapshot = rx.borrow_and_update().snapshot.clone();
            seen_valid |= snapshot.is_valid();
            self.show(&render(&snapshot, seen_valid)).await;
        }
        debug!("presence: follower exit");
    }
}

// ── sinks ─────────────────────────────────────────────────────────────────────

/// Keeps notifications in memory, keyed by id.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<HashMap<u32, String>>,
    posts: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<String> {
        self.entries.lock().ok()?.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every text ever posted, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.posts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn post(&self, id: u32, _title: &str, text: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id, text.to_string());
        }
        if let Ok(mut posts) = self.posts.lock() {
            posts.push(text.to_string());
        }
    }

    async fn cancel(&self, id: u32) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&id);
        }
    }
}

/// Mirrors the notification into a status file (for bars and widgets) and
/// forwards it to connected clients.
///
/// The file holds exactly one line; it is rewritten through a temp file so
/// readers never see a half-written status, and removed on cancel.
pub struct StatusFileSink {
    path: PathBuf,
    broadcast_tx: Option<broadcast::Sender<BroadcastMessage>>,
}

impl StatusFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            broadcast_tx: None,
        }
    }

    pub fn with_broadcast(mut self, tx: broadcast::Sender<BroadcastMessage>) -> Self {
        self.broadcast_tx = Some(tx);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_atomic(&self, line: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, format!("{}\n", line)).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn forward(&self, text: Option<String>) {
        if let Some(tx) = &self.broadcast_tx {
            // No receivers is fine
            let _ = tx.send(BroadcastMessage::Presence(text));
        }
    }
}

#[async_trait]
impl NotificationSink for StatusFileSink {
    async fn post(&self, _id: u32, title: &str, text: &str) {
        if let Err(e) = self.write_atomic(&format!("{}: {}", title, text)).await {
            warn!("presence: failed to write {}: {}", self.path.display(), e);
        }
        self.forward(Some(text.to_string()));
    }

    async fn cancel(&self, _id: u32) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("presence: failed to remove {}: {}", self.path.display(), e),
        }
        self.forward(None);
    }
}
