//! Error types for the session-surveillance core.
//!
//! The taxonomy mirrors the failure domains of the pipeline: validation
//! failures are rejected at the boundary before any state mutation, storage
//! and scorer failures degrade gracefully and are never fatal to ingestion.

use thiserror::Error;

/// A malformed incoming event, rejected before any state mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown event type: {0:?}")]
    UnknownEventType(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Status query for a session id that is unknown or already reaped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session not found: {0}")]
pub struct NotFoundError(pub String);

/// Persistence of an event or alert failed.
///
/// Logged and retried by the sink worker; never propagated to ingestion.
#[derive(Debug, Clone, Error)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

/// The anomaly scorer failed to produce a margin.
///
/// Treated as "no scoring contribution", never as a pipeline failure.
#[derive(Debug, Clone, Error)]
#[error("scorer error: {0}")]
pub struct ScorerError(pub String);
