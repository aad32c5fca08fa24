//! The error taxonomy from spec §7, as a single umbrella enum used at
//! crate boundaries. Components that need a narrower error surface define
//! their own `thiserror` enum and convert into this one at the edge.

use crate::SafeDisplay;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CloudAiError {
    #[error("worker is not pre-authorized")]
    Unauthorized,
    #[error("worker id already registered")]
    AlreadyRegistered,
    #[error("worker has running tasks")]
    HasRunningTasks,
    #[error("insufficient resources on worker")]
    InsufficientResources,
    #[error("worker unreachable: {0}")]
    WorkerUnreachable(String),
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient store failure: {0}")]
    Transient(String),
}

impl SafeDisplay for CloudAiError {
    fn to_safe_string(&self) -> String {
        // None of these variants carry secrets, but a few wrap caller-supplied
        // strings (task ids, image names); keep the mapping explicit so a
        // future variant with sensitive content doesn't leak by accident.
        self.to_string()
    }
}
