use thiserror::Error;

/// All errors produced by lector-core.
#[derive(Debug, Error)]
pub enum LectorError {
    #[error("coordinator is disposed")]
    Disposed,

    #[error("semaphore wait cancelled: {reason}")]
    AcquireCancelled { reason: String },

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("cache registration error: {0}")]
    CacheRegister(String),

    #[error("player probe error: {0}")]
    Probe(String),

    #[error("calibration is already running")]
    AlreadyRunning,

    #[error("calibration is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LectorError>;
