//! # sessionguard-core
//!
//! Core type system and analysis engines for sessionguard -- real-time
//! session surveillance for cheating and account-compromise detection.
//!
//! This crate defines the shared types and engines used by the daemon: the
//! event and alert model, the concurrent session table, the rule-based
//! security analyzer with its pluggable anomaly scorer, the persistence
//! collaborator contracts, and configuration.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod event;
pub mod scorer;
pub mod session;
pub mod store;

pub use analyzer::SecurityAnalyzer;
pub use config::GuardConfig;
pub use error::{NotFoundError, ScorerError, StorageError, ValidationError};
pub use event::{EventType, RawEvent, SecurityAlert, SessionEvent, Severity};
pub use scorer::{AnomalyScorer, ThresholdScorer};
pub use session::{Session, SessionStatus, SessionTable};
