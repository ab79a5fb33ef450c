//! Persistence and notification collaborator contracts.
//!
//! The durable store and the live-dashboard publisher are external to the
//! core, but their contracts belong here. Ships with three reference
//! implementations: an in-memory store for tests and development, a JSONL
//! file store (append-only, corrupt-line tolerant), and a broadcast
//! publisher for in-process fan-out.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::StorageError;
use crate::event::{SecurityAlert, SessionEvent};

/// Durable sink for ingested events.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &SessionEvent) -> Result<(), StorageError>;
}

/// Durable sink and query surface for alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), StorageError>;

    /// Alerts for one session, most recent first, at most `limit`.
    async fn query_alerts(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<SecurityAlert>, StorageError>;
}

/// Best-effort fan-out of events to live consumers (dashboards).
pub trait EventPublisher: Send + Sync {
    fn publish(&self, channel: &str, event: &SessionEvent) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory store for tests and development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Mutex<Vec<SessionEvent>>,
    alerts: Mutex<Vec<SecurityAlert>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<SecurityAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: &SessionEvent) -> Result<(), StorageError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), StorageError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }

    async fn query_alerts(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<SecurityAlert>, StorageError> {
        let alerts = self.alerts.lock().unwrap();
        let mut matching: Vec<SecurityAlert> = alerts
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        matching.reverse();
        matching.truncate(limit);
        Ok(matching)
    }
}

// ---------------------------------------------------------------------------
// JSONL file store
// ---------------------------------------------------------------------------

/// Append-only JSON-lines store: `events.jsonl` and `alerts.jsonl` under a
/// data directory. Reads tolerate corrupt lines by skipping them.
pub struct JsonlStore {
    event_log: Mutex<File>,
    alert_log: Mutex<File>,
    alert_path: PathBuf,
}

impl JsonlStore {
    /// Open (creating as needed) the store under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let event_path = data_dir.join("events.jsonl");
        let alert_path = data_dir.join("alerts.jsonl");
        Ok(Self {
            event_log: Mutex::new(append_handle(&event_path)?),
            alert_log: Mutex::new(append_handle(&alert_path)?),
            alert_path,
        })
    }
}

fn append_handle(path: &Path) -> Result<File, StorageError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn append_line(file: &Mutex<File>, line: &str) -> Result<(), StorageError> {
    let mut guard = file.lock().unwrap();
    writeln!(guard, "{line}")?;
    guard.flush()?;
    Ok(())
}

#[async_trait]
impl EventStore for JsonlStore {
    async fn insert_event(&self, event: &SessionEvent) -> Result<(), StorageError> {
        let json = serde_json::to_string(event)?;
        append_line(&self.event_log, &json)
    }
}

#[async_trait]
impl AlertStore for JsonlStore {
    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), StorageError> {
        let json = serde_json::to_string(alert)?;
        append_line(&self.alert_log, &json)
    }

    async fn query_alerts(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<SecurityAlert>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Hold the write lock so the reader sees fully flushed lines.
        let _guard = self.alert_log.lock().unwrap();
        let file = match File::open(&self.alert_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        // Most recent first with a limit: keep a bounded tail while scanning.
        let mut tail: VecDeque<SecurityAlert> = VecDeque::with_capacity(limit);
        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let alert: SecurityAlert = match serde_json::from_str(trimmed) {
                Ok(a) => a,
                // Skip corrupt lines rather than failing the query.
                Err(_) => continue,
            };
            if alert.session_id != session_id {
                continue;
            }
            if tail.len() == limit {
                tail.pop_front();
            }
            tail.push_back(alert);
        }

        Ok(tail.into_iter().rev().collect())
    }
}

// ---------------------------------------------------------------------------
// Broadcast publisher
// ---------------------------------------------------------------------------

/// An event as delivered to live subscribers.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub channel: String,
    pub event: SessionEvent,
}

/// In-process fan-out on a tokio broadcast channel.
///
/// Publishing never fails the pipeline: lagging or absent subscribers are
/// the subscriber's problem, not the publisher's.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, channel: &str, event: &SessionEvent) -> Result<(), StorageError> {
        let delivered = self.tx.send(PublishedEvent {
            channel: channel.to_string(),
            event: event.clone(),
        });
        if delivered.is_err() {
            debug!(channel, "no live subscribers for published event");
        }
        Ok(())
    }
}
