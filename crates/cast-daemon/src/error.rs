use thiserror::Error;

/// Failures surfaced to whoever issued a one-shot command.  The polling loop
/// itself never produces these: unknown engine state is a sentinel, not an
/// error.
#[derive(Debug, Error)]
pub enum CastError {
    #[error("no casting session is active")]
    NoSession,

    #[error("engine reported failure for {command}")]
    CommandFailed { command: &'static str },

    #[error("device volume is unavailable")]
    VolumeUnavailable,

    #[error("command worker did not finish: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CastError>;
