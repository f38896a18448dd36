//! DaemonCore: single event loop that turns client commands into controller
//! calls.
//!
//! Socket and HTTP clients send `DaemonEvent`s here.  The loop owns no
//! playback state of its own; everything lives behind `CastController`.
//! State changes reach clients through `BroadcastMessage::StateUpdated`,
//! emitted by the forwarder task rather than by each command handler.  The
//! outcome of a command goes back to its sender alone, over the oneshot that
//! came with it.
use std::sync::Arc;

use cast_daemon::{BroadcastMessage, CastController, CastError};
use cast_proto::protocol::Command;
use cast_proto::snapshot::SessionTarget;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// What a client learns about its own command: the volume for volume
/// commands, or the error text.
pub type CommandOutcome = Result<Option<u8>, String>;

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket or HTTP client.
    ClientCommand {
        cmd: Command,
        reply: Option<oneshot::Sender<CommandOutcome>>,
    },
    /// Ctrl-C or SIGTERM.
    Shutdown,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    controller: Arc<CastController>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Volume read started after the last `Start`, aborted when a new one begins.
    volume_reader: Option<tokio::task::JoinHandle<()>>,
}

impl DaemonCore {
    pub fn new(
        controller: Arc<CastController>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            controller,
            broadcast_tx,
            volume_reader: None,
        }
    }

    /// Run until `Shutdown` arrives or every sender is gone, then tear the
    /// session down and release the engine.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let forwarder_cancel = CancellationToken::new();
        let forwarder = spawn_state_forwarder(
            self.controller.clone(),
            self.broadcast_tx.clone(),
            forwarder_cancel.clone(),
        );

        loop {
            match event_rx.recv().await {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }
                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }
                Some(DaemonEvent::ClientCommand { cmd, reply }) => {
                    info!("DaemonCore: command {:?}", cmd);
                    let outcome = self.handle_command(cmd).await.map_err(|e| {
                        warn!("DaemonCore: command error: {}", e);
                        // Observers such as `castctl watch` still see every failure
                        let _ = self.broadcast_tx.send(BroadcastMessage::Error(e.to_string()));
                        e.to_string()
                    });
                    if let Some(reply) = reply {
                        // The client may have gone away meanwhile
                        let _ = reply.send(outcome);
                    }
                }
            }
        }

        self.abort_volume_reader();
        self.controller.shutdown().await;
        forwarder_cancel.cancel();
        let _ = forwarder.await;
        Ok(())
    }

    /// Run one command.  Volume commands return the resulting volume.
    pub async fn handle_command(&mut self, cmd: Command) -> Result<Option<u8>, CastError> {
        let mut volume = None;
        match cmd {
            Command::Start {
                base_url,
                room_id,
                location,
            } => {
                self.controller
                    .start(SessionTarget::new(base_url, room_id, location))
                    .await;
                self.spawn_volume_reader();
            }
            Command::Stop => {
                self.abort_volume_reader();
                self.controller.stop().await;
            }
            Command::Reset => {
                self.abort_volume_reader();
                self.controller.reset().await;
            }
            Command::TogglePause => {
                self.controller.toggle_pause().await?;
            }
            Command::Next => self.controller.next().await?,
            Command::Seek { seconds } => {
                self.controller.seek(seconds).await?;
            }
            Command::SetVolume { value } => {
                volume = Some(self.controller.set_volume(value).await?);
            }
            Command::NudgeVolume { delta } => {
                volume = Some(self.controller.nudge_volume(delta).await?);
            }
            Command::GetVolume => {
                volume = Some(self.controller.get_volume().await?);
            }
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
        if volume.is_some() {
            self.send_volume(volume);
        }
        Ok(volume)
    }

    /// The device often has no volume to report right after connecting, so
    /// the first read is retried in the background.
    fn spawn_volume_reader(&mut self) {
        self.abort_volume_reader();
        let controller = self.controller.clone();
        let tx = self.broadcast_tx.clone();
        self.volume_reader = Some(tokio::spawn(async move {
            match controller.get_volume_with_retry().await {
                Ok(volume) => {
                    debug!("DaemonCore: initial volume {}", volume);
                    let _ = tx.send(BroadcastMessage::Volume(Some(volume)));
                }
                Err(e) => {
                    warn!("DaemonCore: initial volume read failed: {}", e);
                    let _ = tx.send(BroadcastMessage::Volume(None));
                }
            }
        }));
    }

    fn abort_volume_reader(&mut self) {
        if let Some(reader) = self.volume_reader.take() {
            reader.abort();
        }
    }

    fn send_volume(&self, volume: Option<u8>) {
        let _ = self.broadcast_tx.send(BroadcastMessage::Volume(volume));
    }
}

/// Emit `StateUpdated` whenever the snapshot, the playing flag or the run
/// phase changes.  Bursts collapse: the watch channels only keep the latest
/// value.
pub fn spawn_state_forwarder(
    controller: Arc<CastController>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut snapshot_rx = controller.publisher().subscribe();
    let mut playing_rx = controller.publisher().subscribe_playing();
    let mut run_state_rx = controller.subscribe_run_state();
    tokio::spawn(async move {
        loop {
            let changed = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = snapshot_rx.changed() => r.is_ok(),
                r = playing_rx.changed() => r.is_ok(),
                r = run_state_rx.changed() => r.is_ok(),
            };
            if !changed {
                break;
            }
            let _ = snapshot_rx.borrow_and_update();
            let _ = playing_rx.borrow_and_update();
            let _ = run_state_rx.borrow_and_update();
            let _ = broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
        debug!("DaemonCore: state forwarder exit");
    })
}
