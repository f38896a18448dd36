//! Casting supervisor: polls an external playback engine, auto-advances at
//! the end of each track and mirrors progress into a presence notification.
//!
//! ```text
//!   CastController ── start/stop/reset ──► Supervisor task ──► EngineGateway
//!         │                                     │
//!         │                                     ▼
//!         └──────── commands ──────────►  StatePublisher ──► PresenceNotifier
//!                                               │
//!                                               └──► socket / HTTP observers
//! ```

pub mod controller;
pub mod engine;
pub mod error;
pub mod presence;
pub mod publisher;
pub mod supervisor;

pub use controller::CastController;
pub use error::CastError;

/// Fan-out channel between the daemon internals and connected clients.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Presence(Option<String>),
    Volume(Option<u8>),
    Log(String),
    Error(String),
}
