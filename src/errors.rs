//! Errors surfaced by the scheduler's public API.
//!
//! Only thread creation can fail recoverably. Everything else that goes
//! wrong — a corrupt record, a bad state transition, a call at the wrong
//! interrupt level — is kernel corruption and panics instead.

use core::fmt;

/// Result type for fallible scheduler operations.
pub type SchedResult<T> = Result<T, SpawnError>;

/// Errors that can occur while creating a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The scheduler has not been initialized yet.
    NotInitialized,
    /// No page was available for the thread's stack.
    OutOfMemory,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NotInitialized => write!(f, "scheduler not initialized"),
            SpawnError::OutOfMemory => write!(f, "out of pages for thread stack"),
        }
    }
}
