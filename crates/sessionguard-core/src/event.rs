//! Event and alert types for sessionguard.
//!
//! Events are the fundamental data unit flowing through sessionguard. They
//! arrive from client monitoring agents as [`RawEvent`] wire records, are
//! validated and timestamped by the pipeline into immutable [`SessionEvent`]s,
//! and may produce [`SecurityAlert`]s in the analyzer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The closed set of client-reported behavioral event types.
///
/// Unknown values are rejected at the pipeline boundary with a
/// `ValidationError`, never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    SessionEnd,
    Heartbeat,
    TabSwitch,
    Inactivity,
    ScreenLock,
    DeviceChange,
    CopyPaste,
    RightClick,
    KeyboardShortcut,
}

impl EventType {
    /// Parse the snake_case wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session_start" => Some(Self::SessionStart),
            "session_end" => Some(Self::SessionEnd),
            "heartbeat" => Some(Self::Heartbeat),
            "tab_switch" => Some(Self::TabSwitch),
            "inactivity" => Some(Self::Inactivity),
            "screen_lock" => Some(Self::ScreenLock),
            "device_change" => Some(Self::DeviceChange),
            "copy_paste" => Some(Self::CopyPaste),
            "right_click" => Some(Self::RightClick),
            "keyboard_shortcut" => Some(Self::KeyboardShortcut),
            _ => None,
        }
    }

    /// The snake_case wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Heartbeat => "heartbeat",
            Self::TabSwitch => "tab_switch",
            Self::Inactivity => "inactivity",
            Self::ScreenLock => "screen_lock",
            Self::DeviceChange => "device_change",
            Self::CopyPaste => "copy_paste",
            Self::RightClick => "right_click",
            Self::KeyboardShortcut => "keyboard_shortcut",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity level for a security alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Logged but unlikely to need intervention.
    Low,
    /// Worth reviewing.
    Medium,
    /// Likely requires proctor attention.
    High,
    /// Immediate action recommended.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Wire form of an incoming event, exactly as a monitoring client sends it.
///
/// Any client-supplied `timestamp` field is ignored during deserialization;
/// the pipeline stamps its own ingestion time so timing-sensitive rules
/// cannot be spoofed.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub device_fingerprint: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// An immutable, validated, ingestion-timestamped session event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub user_id: String,
    pub session_id: String,
    pub event_type: EventType,
    /// Assigned by the pipeline at ingestion; never trusted from the client.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub device_fingerprint: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SessionEvent {
    /// Read a numeric metadata value, if present and numeric.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }
}

/// A flagged security concern produced by the analyzer for one event.
///
/// Write-once from the core's perspective; `resolved` is owned by external
/// review tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub alert_id: Uuid,
    pub user_id: String,
    pub session_id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub resolved: bool,
}

impl SecurityAlert {
    /// Build an alert for the given triggering event, copying its metadata.
    pub fn for_event(event: &SessionEvent, severity: Severity, description: String) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            event_type: event.event_type,
            severity,
            description,
            timestamp: event.timestamp,
            metadata: event.metadata.clone(),
            resolved: false,
        }
    }
}
