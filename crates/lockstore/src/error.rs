//! Error types for the lock store

use std::time::Duration;
use thiserror::Error;

/// Lock store errors
#[derive(Error, Debug)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {name}")]
    WaitTimeout { name: String, waited: Duration },

    #[error("lock {0} is not held by this handle")]
    NotHeld(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("lock server unreachable: {0}")]
    Transport(String),

    #[error("lock store backend error: {0}")]
    Backend(String),
}

impl LockError {
    /// Whether the failure came from waiting on a busy lock rather than from the store itself.
    pub fn is_wait_timeout(&self) -> bool {
        matches!(self, LockError::WaitTimeout { .. })
    }
}

impl From<bincode::Error> for LockError {
    fn from(e: bincode::Error) -> Self {
        LockError::Codec(e.to_string())
    }
}

pub type LockResult<T> = Result<T, LockError>;
