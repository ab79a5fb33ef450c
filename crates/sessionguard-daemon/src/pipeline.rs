//! Event ingestion pipeline.
//!
//! Turns a raw wire event into an updated session row plus zero or more
//! alerts: validate → stamp ingestion time → update the session table →
//! analyze, all inside one per-session critical section, then hand the
//! event and alerts to the persistence/notification collaborators through
//! a channel drained by the sink worker. Collaborator failures are logged
//! and retried off the ingestion path; they never fail or roll back a
//! submission.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use sessionguard_core::analyzer::SecurityAnalyzer;
use sessionguard_core::config::PipelineConfig;
use sessionguard_core::error::ValidationError;
use sessionguard_core::event::{EventType, RawEvent, SecurityAlert, SessionEvent};
use sessionguard_core::session::{SessionStatus, SessionTable};
use sessionguard_core::store::{AlertStore, EventPublisher, EventStore};

/// Channel name the sink worker publishes ingested events on.
pub const EVENT_CHANNEL: &str = "session_events";

/// Outcome of an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// Whether the session was known and analysis ran. Events for unknown
    /// sessions are accepted without analysis (out-of-order delivery from
    /// the transport is expected).
    pub session_known: bool,
    /// Alerts the analyzer emitted for this event.
    pub alerts: usize,
}

/// Record handed from ingestion to the sink worker.
enum SinkRecord {
    Event(SessionEvent),
    Alert(SecurityAlert),
}

/// The ingestion pipeline. Cheap to share behind an `Arc`; submissions for
/// different sessions proceed in parallel.
pub struct EventPipeline {
    table: Arc<SessionTable>,
    analyzer: SecurityAnalyzer,
    sink_tx: mpsc::Sender<SinkRecord>,
}

impl EventPipeline {
    /// Build the pipeline and spawn its sink worker.
    ///
    /// The returned handle completes once the pipeline is dropped and the
    /// worker has drained every accepted record; await it during shutdown
    /// so nothing accepted is silently lost.
    pub fn new(
        table: Arc<SessionTable>,
        analyzer: SecurityAnalyzer,
        config: &PipelineConfig,
        event_store: Arc<dyn EventStore>,
        alert_store: Arc<dyn AlertStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> (Self, JoinHandle<()>) {
        let (sink_tx, sink_rx) = mpsc::channel(config.queue_capacity.max(1));
        let worker = SinkWorker {
            rx: sink_rx,
            event_store,
            alert_store,
            publisher,
            retry_attempts: config.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        };
        let handle = tokio::spawn(worker.run());
        (
            Self {
                table,
                analyzer,
                sink_tx,
            },
            handle,
        )
    }

    /// Submit one raw event.
    ///
    /// Rejected events perform no state mutation. Accepted events update the
    /// session (when known), run analysis, and are handed off for
    /// persistence regardless of whether the session exists.
    pub fn submit(&self, raw: RawEvent) -> Result<Accepted, ValidationError> {
        let event = self.validate_and_stamp(raw)?;

        // Update + analyze inside a single per-session critical section so
        // concurrent same-session events can never observe a torn state.
        // Nothing in here does I/O.
        let outcome = match event.event_type {
            EventType::SessionStart => {
                self.table
                    .upsert_start(&event.session_id, &event.user_id, event.timestamp);
                self.table
                    .apply(&event.session_id, |session| {
                        self.analyzer.analyze(&event, session)
                    })
            }
            _ => self.table.apply(&event.session_id, |session| {
                match event.event_type {
                    EventType::Heartbeat => session.last_heartbeat = event.timestamp,
                    EventType::SessionEnd => session.status = SessionStatus::Ended,
                    EventType::TabSwitch => session.tab_switch_timestamps.push(event.timestamp),
                    _ => {}
                }
                session.event_count += 1;
                self.analyzer.analyze(&event, session)
            }),
        };

        let (session_known, alerts) = match outcome {
            Some(alerts) => (true, alerts),
            None => {
                debug!(
                    session_id = %event.session_id,
                    event_type = %event.event_type,
                    "event for unknown session; analysis skipped"
                );
                (false, Vec::new())
            }
        };

        // Hand-off happens after the critical section released.
        let alert_count = alerts.len();
        self.enqueue(SinkRecord::Event(event));
        for alert in alerts {
            warn!(
                session_id = %alert.session_id,
                severity = %alert.severity,
                description = %alert.description,
                "security alert"
            );
            self.enqueue(SinkRecord::Alert(alert));
        }

        Ok(Accepted {
            session_known,
            alerts: alert_count,
        })
    }

    fn validate_and_stamp(&self, raw: RawEvent) -> Result<SessionEvent, ValidationError> {
        if raw.user_id.is_empty() {
            return Err(ValidationError::MissingField("user_id"));
        }
        if raw.session_id.is_empty() {
            return Err(ValidationError::MissingField("session_id"));
        }
        if raw.event_type.is_empty() {
            return Err(ValidationError::MissingField("event_type"));
        }
        let event_type = EventType::parse(&raw.event_type)
            .ok_or_else(|| ValidationError::UnknownEventType(raw.event_type.clone()))?;

        Ok(SessionEvent {
            user_id: raw.user_id,
            session_id: raw.session_id,
            event_type,
            // Client timestamps are never trusted; stamp ingestion time.
            timestamp: Utc::now(),
            metadata: raw.metadata,
            device_fingerprint: raw.device_fingerprint,
            ip_address: raw.ip_address,
            user_agent: raw.user_agent,
        })
    }

    fn enqueue(&self, record: SinkRecord) {
        if self.sink_tx.try_send(record).is_err() {
            warn!("sink queue full or closed; record not handed to persistence");
        }
    }
}

/// Drains accepted records into the stores with bounded retry, and fans
/// events out to the publisher best-effort.
struct SinkWorker {
    rx: mpsc::Receiver<SinkRecord>,
    event_store: Arc<dyn EventStore>,
    alert_store: Arc<dyn AlertStore>,
    publisher: Arc<dyn EventPublisher>,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl SinkWorker {
    async fn run(mut self) {
        while let Some(record) = self.rx.recv().await {
            match record {
                SinkRecord::Event(event) => {
                    self.persist_event(&event).await;
                    if let Err(e) = self.publisher.publish(EVENT_CHANNEL, &event) {
                        warn!(error = %e, "event publish failed");
                    }
                }
                SinkRecord::Alert(alert) => self.persist_alert(&alert).await,
            }
        }
        debug!("sink worker drained and shut down");
    }

    async fn persist_event(&self, event: &SessionEvent) {
        let mut backoff = self.retry_backoff;
        for attempt in 1..=self.retry_attempts {
            match self.event_store.insert_event(event).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(attempt, error = %e, "event persistence failed");
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        error!(
            session_id = %event.session_id,
            event_type = %event.event_type,
            "giving up on event persistence"
        );
    }

    async fn persist_alert(&self, alert: &SecurityAlert) {
        let mut backoff = self.retry_backoff;
        for attempt in 1..=self.retry_attempts {
            match self.alert_store.insert_alert(alert).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(attempt, error = %e, "alert persistence failed");
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        error!(alert_id = %alert.alert_id, "giving up on alert persistence");
    }
}
