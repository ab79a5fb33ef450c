//! sessionguard daemon orchestration.
//!
//! The [`Daemon`] struct ties the session table, analyzer, ingestion
//! pipeline, persistence collaborators, and reaper into a single process
//! with a graceful shutdown sequence. It also carries the query operations
//! a transport layer exposes: submit, per-session status, and the session
//! listing for dashboards.

pub mod pipeline;
pub mod reaper;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sessionguard_core::analyzer::SecurityAnalyzer;
use sessionguard_core::config::GuardConfig;
use sessionguard_core::error::{NotFoundError, ValidationError};
use sessionguard_core::event::{RawEvent, SecurityAlert};
use sessionguard_core::scorer::{AnomalyScorer, ThresholdScorer};
use sessionguard_core::session::{SessionStatus, SessionTable};
use sessionguard_core::store::{
    AlertStore, BroadcastPublisher, EventPublisher, EventStore, JsonlStore,
};

use pipeline::{Accepted, EventPipeline};
use reaper::SessionReaper;

/// Per-session view returned by a status query.
#[derive(Debug, Clone)]
pub struct SessionStatusView {
    pub session_id: String,
    pub status: SessionStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub risk_score: f64,
    pub recent_alerts: Vec<SecurityAlert>,
}

/// One row of the session listing for dashboards.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub risk_score: f64,
    pub alert_count: usize,
}

/// The daemon: pipeline + reaper + collaborators, with clean shutdown.
pub struct Daemon {
    table: Arc<SessionTable>,
    pipeline: EventPipeline,
    alert_store: Arc<dyn AlertStore>,
    query_limit: usize,
    cancel: CancellationToken,
    sink_handle: JoinHandle<()>,
    reaper_handle: JoinHandle<()>,
}

impl Daemon {
    /// Build a daemon with the JSONL store and broadcast publisher from the
    /// configuration. The anomaly scorer defaults to the reference
    /// [`ThresholdScorer`] when scoring is enabled, and is absent otherwise.
    pub fn new(config: GuardConfig) -> Result<Self> {
        let store = Arc::new(
            JsonlStore::open(&config.store.data_dir).context("opening data store")?,
        );
        let scorer: Option<Arc<dyn AnomalyScorer>> = if config.scoring.enabled {
            Some(Arc::new(ThresholdScorer::default()))
        } else {
            None
        };
        Self::with_collaborators(
            config,
            scorer,
            Arc::clone(&store) as Arc<dyn EventStore>,
            store,
            Arc::new(BroadcastPublisher::new(256)),
        )
    }

    /// Build a daemon around explicit collaborators. Used by tests and by
    /// embedders that bring their own stores.
    pub fn with_collaborators(
        config: GuardConfig,
        scorer: Option<Arc<dyn AnomalyScorer>>,
        event_store: Arc<dyn EventStore>,
        alert_store: Arc<dyn AlertStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let table = Arc::new(SessionTable::new());

        let mut analyzer = SecurityAnalyzer::new(config.thresholds.clone());
        if let Some(scorer) = scorer {
            analyzer = analyzer.with_scorer(scorer);
        } else {
            info!("no anomaly scorer configured; rule-based checks only");
        }

        let (pipeline, sink_handle) = EventPipeline::new(
            Arc::clone(&table),
            analyzer,
            &config.pipeline,
            event_store,
            Arc::clone(&alert_store),
            publisher,
        );

        let cancel = CancellationToken::new();
        let reaper_handle =
            SessionReaper::new(Arc::clone(&table), config.reaper.clone()).spawn(cancel.clone());

        Ok(Self {
            table,
            pipeline,
            alert_store,
            query_limit: config.store.query_limit,
            cancel,
            sink_handle,
            reaper_handle,
        })
    }

    /// Submit one raw event to the pipeline.
    pub fn submit_event(&self, raw: RawEvent) -> Result<Accepted, ValidationError> {
        self.pipeline.submit(raw)
    }

    /// Status and recent alerts for one session.
    pub async fn get_session_status(
        &self,
        session_id: &str,
    ) -> Result<SessionStatusView, NotFoundError> {
        let session = self
            .table
            .get(session_id)
            .ok_or_else(|| NotFoundError(session_id.to_string()))?;

        // Alert history is advisory; a failing store degrades to an empty
        // list rather than failing the query.
        let recent_alerts = match self
            .alert_store
            .query_alerts(session_id, self.query_limit)
            .await
        {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(session_id, error = %e, "alert query failed");
                Vec::new()
            }
        };

        Ok(SessionStatusView {
            session_id: session.session_id,
            status: session.status,
            last_heartbeat: session.last_heartbeat,
            risk_score: session.risk_score,
            recent_alerts,
        })
    }

    /// Summaries of all live sessions, ordered by session id.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        for session in self.table.snapshot() {
            let alert_count = self
                .alert_store
                .query_alerts(&session.session_id, self.query_limit)
                .await
                .map(|alerts| alerts.len())
                .unwrap_or(0);
            summaries.push(SessionSummary {
                session_id: session.session_id,
                user_id: session.user_id,
                status: session.status,
                start_time: session.start_time,
                last_heartbeat: session.last_heartbeat,
                risk_score: session.risk_score,
                alert_count,
            });
        }
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        summaries
    }

    /// Number of live sessions in the table.
    pub fn session_count(&self) -> usize {
        self.table.len()
    }

    /// Stop the reaper and drain the persistence queue, then return.
    ///
    /// Every event accepted before this call is handed to the stores before
    /// shutdown completes.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.reaper_handle.await;

        // Dropping the pipeline closes the sink channel; the worker drains
        // whatever was accepted and then finishes.
        drop(self.pipeline);
        let _ = self.sink_handle.await;

        info!("daemon shut down");
    }
}
