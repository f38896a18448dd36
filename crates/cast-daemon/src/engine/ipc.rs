//! Engine IPC client with separated reader/writer tasks.
//!
//! Architecture:
//!
//! ```text
//!   IpcEngine::request()        (connects lazily, reconnects once the link drops)
//!         │
//!         ├── pending map   ← request_id registered before sending, dropped on timeout
//!         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
//!         └── reader_task   ← reads JSON lines from socket
//!                                └── response (has request_id) → matched oneshot::Sender
//! ```
//!
//! Wire format, one JSON object per line:
//!   → `{"command": ["get_property", "progress"], "request_id": 7}`
//!   ← `{"request_id": 7, "error": "success", "data": 42}`
//!
//! Every failure (no listener, timeout, engine error) degrades to the
//! sentinel of the call; nothing is retried here.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cast_proto::config::EngineConfig;
use cast_proto::snapshot::{SessionTarget, UNKNOWN_TITLE};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use super::{EngineGateway, SENTINEL_FAILED, TOGGLE_PAUSED, TOGGLE_PLAYING};

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

/// One live connection to the engine.  Cheap to clone.
#[derive(Clone)]
struct EngineLink {
    tx: mpsc::Sender<PendingRequest>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
}

impl EngineLink {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed) && !self.tx.is_closed()
    }

    async fn send(&self, command: Value, timeout: Duration) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        // Registered before the write so the reader can always match the reply
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(req_id, reply_tx);

        if self
            .tx
            .send(PendingRequest {
                req_id,
                payload: raw,
            })
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&req_id);
            anyhow::bail!("engine writer task gone");
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(reply) => {
                reply.map_err(|_| anyhow::anyhow!("engine reply channel dropped req={}", req_id))?
            }
            Err(_) => {
                // A silent engine must not leave one entry behind per request
                self.pending.lock().await.remove(&req_id);
                Err(anyhow::anyhow!("engine IPC timeout for req={}", req_id))
            }
        }
    }
}

// ── gateway ───────────────────────────────────────────────────────────────────

/// [`EngineGateway`] backed by the engine's JSON IPC listener.
///
/// When `binary` is configured the engine process is spawned (and respawned
/// after it exits) before connecting; otherwise it must already be running.
pub struct IpcEngine {
    address: String,
    binary: Option<PathBuf>,
    timeout: Duration,
    link: Mutex<Option<EngineLink>>,
    process: Mutex<Option<tokio::process::Child>>,
}

impl IpcEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            address: config.address.clone(),
            binary: config.binary.clone(),
            timeout: Duration::from_millis(config.ipc_timeout_ms.max(1)),
            link: Mutex::new(None),
            process: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Kill the engine process if we spawned one.
    pub async fn kill(&self) {
        self.link.lock().await.take();
        if let Some(mut p) = self.process.lock().await.take() {
            let _ = p.kill().await;
        }
    }

    async fn link(&self) -> anyhow::Result<EngineLink> {
        let mut guard = self.link.lock().await;
        if let Some(link) = guard.as_ref() {
            if link.is_alive() {
                return Ok(link.clone());
            }
            debug!("engine: link dropped, reconnecting");
        }
        let link = self.connect().await?;
        *guard = Some(link.clone());
        Ok(link)
    }

    async fn connect(&self) -> anyhow::Result<EngineLink> {
        if let Some(binary) = &self.binary {
            self.ensure_process(binary).await?;
        }
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| anyhow::anyhow!("engine connect timeout ({})", self.address))??;
        info!("engine: connected to {}", self.address);
        Ok(start_io_tasks(stream))
    }

    async fn ensure_process(&self, binary: &Path) -> anyhow::Result<()> {
        let mut process = self.process.lock().await;
        if let Some(child) = process.as_mut() {
            if child.try_wait()?.is_none() {
                return Ok(());
            }
            warn!("engine: process exited, respawning");
        }

        info!("engine: spawning {}", binary.display());
        let child = tokio::process::Command::new(binary)
            .arg("--listen")
            .arg(&self.address)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        *process = Some(child);

        // Wait for the listener to appear
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if TcpStream::connect(&self.address).await.is_ok() {
                return Ok(());
            }
        }
        anyhow::bail!("engine IPC listener did not appear at {}", self.address)
    }

    async fn request(&self, command: Value) -> anyhow::Result<Value> {
        let link = self.link().await?;
        link.send(command, self.timeout).await
    }

    async fn query_secs(&self, property: &str, fallback: i64) -> i64 {
        match self.request(json!(["get_property", property])).await {
            Ok(resp) => value_as_i64(&resp["data"]).unwrap_or(fallback),
            Err(e) => {
                debug!("engine: get_property {} failed: {}", property, e);
                fallback
            }
        }
    }

    async fn command_i64(&self, command: Value) -> i64 {
        match self.request(command.clone()).await {
            Ok(resp) => value_as_i64(&resp["data"]).unwrap_or(SENTINEL_FAILED),
            Err(e) => {
                warn!("engine: {} failed: {}", command, e);
                SENTINEL_FAILED
            }
        }
    }

    async fn fire(&self, command: Value) {
        if let Err(e) = self.request(command.clone()).await {
            warn!("engine: {} failed: {}", command, e);
        }
    }
}

/// Engines report seconds as integers or floats and flags as booleans.
fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        Value::Bool(true) => Some(TOGGLE_PLAYING),
        Value::Bool(false) => Some(TOGGLE_PAUSED),
        _ => None,
    }
}

#[async_trait]
impl EngineGateway for IpcEngine {
    async fn start_session(&self, target: &SessionTarget) {
        self.fire(json!([
            "start_session",
            target.base_url,
            target.room_id,
            target.device_location
        ]))
        .await;
    }

    async fn query_progress(&self) -> i64 {
        let secs = self.query_secs("progress", SENTINEL_FAILED).await;
        if secs < 0 {
            SENTINEL_FAILED
        } else {
            secs
        }
    }

    async fn query_total_duration(&self) -> i64 {
        self.query_secs("duration", 0).await
    }

    async fn query_title(&self) -> String {
        match self.request(json!(["get_property", "title"])).await {
            Ok(resp) => resp["data"]
                .as_str()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(UNKNOWN_TITLE)
                .to_string(),
            Err(e) => {
                debug!("engine: get_property title failed: {}", e);
                UNKNOWN_TITLE.to_string()
            }
        }
    }

    async fn issue_next(&self) {
        self.fire(json!(["next"])).await;
    }

    async fn issue_toggle_pause(&self) -> i64 {
        self.command_i64(json!(["toggle_pause"])).await
    }

    async fn issue_seek(&self, target_secs: i64) -> i64 {
        self.command_i64(json!(["seek", target_secs])).await
    }

    async fn issue_set_volume(&self, target: i64) -> i64 {
        self.command_i64(json!(["set_volume", target.clamp(0, 100)]))
            .await
    }

    async fn query_volume(&self) -> i64 {
        self.query_secs("volume", SENTINEL_FAILED).await
    }

    async fn reset_session(&self) {
        self.fire(json!(["reset"])).await;
    }

    async fn stop_session(&self) {
        self.fire(json!(["stop"])).await;
    }
}

// ── io tasks ──────────────────────────────────────────────────────────────────

fn start_io_tasks(stream: TcpStream) -> EngineLink {
    let (read_half, write_half) = stream.into_split();
    let reader = BufReader::new(read_half);

    // pending map: req_id → reply channel.  Filled by `EngineLink::send`, resolved by the reader.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let alive = Arc::new(AtomicBool::new(true));

    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone(), alive.clone()));
    tokio::spawn(reader_task(reader, pending.clone(), alive.clone()));

    EngineLink {
        tx: cmd_tx,
        pending,
        alive,
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, alive: Arc<AtomicBool>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("engine reader: connection closed");
                fail_pending(&pending, "engine IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("engine reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) else {
                    debug!("engine reader: ignoring unsolicited message {}", trimmed);
                    continue;
                };

                let mut map = pending.lock().await;
                if let Some(tx) = map.remove(&req_id) {
                    let result = if val["error"].as_str() == Some("success") {
                        Ok(val)
                    } else {
                        let err = val["error"]
                            .as_str()
                            .unwrap_or("unknown error")
                            .to_string();
                        debug!("engine reader: response req={} err={}", req_id, err);
                        Err(anyhow::anyhow!("engine error: {}", err))
                    };
                    let _ = tx.send(result);
                } else {
                    debug!("engine reader: response for unknown req={}", req_id);
                }
            }
            Err(e) => {
                warn!("engine reader: read error: {}", e);
                fail_pending(&pending, "engine IPC read error").await;
                break;
            }
        }
    }
    alive.store(false, Ordering::Relaxed);
}

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        debug!("engine writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("engine writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("engine write error: {}", e)));
            }
            break;
        }
    }
    alive.store(false, Ordering::Relaxed);
    debug!("engine writer: task exiting");
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}
