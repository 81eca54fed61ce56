//! Error taxonomy for the check-in engine.
//!
//! Only failures that resolve synchronously surface as `Err` values:
//! malformed input, illegal state transitions, and local storage faults.
//! Transient network failures never reach the caller — `CheckInEngine`
//! absorbs them into the offline queue and returns a provisional success.
//! Remote business failures and exhausted retries are visible only through
//! the queue's failed-item listing and the drain report.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Malformed input (guest count, missing name/table). Never retried.
    #[error("{0}")]
    Validation(String),

    /// Illegal transition on a terminal or already-checked-in reservation.
    #[error("{0}")]
    StateConflict(String),

    /// Local SQLite fault (open, query, lock poisoning).
    #[error("storage error: {0}")]
    Storage(String),

    /// A queue item used up all of its retries and was removed.
    #[error("check-in {id} failed after {attempts} attempts")]
    QueueExhausted { id: String, attempts: u32 },
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn state_conflict(msg: impl Into<String>) -> Self {
        EngineError::StateConflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        EngineError::Storage(msg.into())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}
