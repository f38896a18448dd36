use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// File mirroring the persistent presence notification.
    #[serde(default = "default_presence_file")]
    pub presence_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// How to reach the external playback engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `host:port` of the engine's JSON IPC listener.
    #[serde(default = "default_engine_address")]
    pub address: String,
    /// Engine executable to spawn before connecting.  When unset the daemon
    /// expects the engine to be running already.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    #[serde(default = "default_ipc_timeout_ms")]
    pub ipc_timeout_ms: u64,
}

/// Polling cadence presets.  Shorter ticks trade engine load for snappier
/// presence updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollPreset {
    #[default]
    Conservative,
    Responsive,
}

impl PollPreset {
    pub fn tick_interval_ms(self) -> u64 {
        match self {
            PollPreset::Conservative => 1000,
            PollPreset::Responsive => 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub preset: PollPreset,
    /// Overrides the preset when set.
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
    /// Grace period before the first tick of a fresh session.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

impl SupervisorConfig {
    pub fn effective_tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
            .filter(|ms| *ms > 0)
            .unwrap_or_else(|| self.preset.tick_interval_ms())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Step used by the +/- volume buttons.
    #[serde(default = "default_volume_step")]
    pub step: u8,
    /// Attempts made when reading the device volume right after connecting.
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
    #[serde(default = "default_read_interval_ms")]
    pub read_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            presence_file: default_presence_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: default_engine_address(),
            binary: None,
            ipc_timeout_ms: default_ipc_timeout_ms(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            preset: PollPreset::default(),
            tick_interval_ms: None,
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            step: default_volume_step(),
            read_attempts: default_read_attempts(),
            read_interval_ms: default_read_interval_ms(),
        }
    }
}

fn default_pid_file() -> PathBuf {
    platform::data_dir().join("daemon.pid")
}

fn default_presence_file() -> PathBuf {
    platform::data_dir().join("presence.txt")
}

fn default_http_enabled() -> bool {
    false
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8979
}

fn default_engine_address() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_ipc_timeout_ms() -> u64 {
    3000
}

fn default_initial_delay_ms() -> u64 {
    2000
}

fn default_volume_step() -> u8 {
    5
}

fn default_read_attempts() -> u32 {
    5
}

fn default_read_interval_ms() -> u64 {
    1000
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
