//! Security analysis rules for session events.
//!
//! The analyzer takes one event plus the session's post-update state and
//! produces zero or more alerts along with the session's new risk score.
//! Rules are evaluated independently (no short-circuiting); every rule that
//! matches fires. Any fired alert clamps the session's risk score to a floor
//! so that rule-flagged sessions are never reported as low-risk, whatever
//! the learned scorer says.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ThresholdConfig;
use crate::event::{EventType, SecurityAlert, SessionEvent, Severity};
use crate::scorer::{normalize_margin, AnomalyScorer, FEATURE_LEN};
use crate::session::Session;

/// Any rule-based alert raises the session risk to at least this value.
const RISK_FLOOR: f64 = 0.8;

/// Applies rule checks and the optional anomaly scorer to one event.
pub struct SecurityAnalyzer {
    thresholds: ThresholdConfig,
    scorer: Option<Arc<dyn AnomalyScorer>>,
}

impl SecurityAnalyzer {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds,
            scorer: None,
        }
    }

    /// Attach an anomaly scorer. Without one the scoring rule is skipped
    /// entirely and rule-based checks still run.
    pub fn with_scorer(mut self, scorer: Arc<dyn AnomalyScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Evaluate all rules against `event` and the session's post-update
    /// state. Mutates the session's tab-switch window and risk score;
    /// returns the alerts that fired, in rule order.
    pub fn analyze(&self, event: &SessionEvent, session: &mut Session) -> Vec<SecurityAlert> {
        let mut alerts = Vec::new();

        if let Some(alert) = self.check_tab_switch_burst(event, session) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_inactivity(event) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_heartbeat_timeout(event, session) {
            alerts.push(alert);
        }
        if let Some(alert) = self.apply_scorer(event, session) {
            alerts.push(alert);
        }

        if !alerts.is_empty() {
            session.risk_score = session.risk_score.max(RISK_FLOOR);
            debug!(
                session_id = %session.session_id,
                alerts = alerts.len(),
                risk_score = session.risk_score,
                "rules fired"
            );
        }

        alerts
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    /// Sliding-window burst detection over tab switches.
    ///
    /// Prunes entries older than the window on every `tab_switch` event, so
    /// the count can never accumulate across the whole session lifetime.
    fn check_tab_switch_burst(
        &self,
        event: &SessionEvent,
        session: &mut Session,
    ) -> Option<SecurityAlert> {
        if event.event_type != EventType::TabSwitch {
            return None;
        }

        let window = chrono::Duration::seconds(self.thresholds.tab_switch_window_secs as i64);
        let cutoff = event.timestamp - window;
        session.tab_switch_timestamps.retain(|ts| *ts > cutoff);

        let count = session.tab_switch_timestamps.len();
        if count > self.thresholds.tab_switch_threshold as usize {
            return Some(SecurityAlert::for_event(
                event,
                Severity::High,
                format!(
                    "Excessive tab switching: {count} switches in the last {}s",
                    self.thresholds.tab_switch_window_secs
                ),
            ));
        }
        None
    }

    /// Reported inactivity beyond the configured threshold.
    fn check_inactivity(&self, event: &SessionEvent) -> Option<SecurityAlert> {
        if event.event_type != EventType::Inactivity {
            return None;
        }

        let duration = event.metadata_f64("duration").unwrap_or(0.0);
        if duration > self.thresholds.inactivity_threshold_secs {
            return Some(SecurityAlert::for_event(
                event,
                Severity::Medium,
                format!("User inactive for {duration:.0} seconds"),
            ));
        }
        None
    }

    /// Heartbeat silence check, run on every event.
    ///
    /// The analyzer sees post-update state, so a heartbeat event has already
    /// reset `last_heartbeat` and cannot alert on itself. A session that
    /// stops sending heartbeats but keeps sending other events re-triggers
    /// this alert on each of them; that signals a stalled monitoring agent.
    fn check_heartbeat_timeout(
        &self,
        event: &SessionEvent,
        session: &Session,
    ) -> Option<SecurityAlert> {
        let elapsed = (event.timestamp - session.last_heartbeat)
            .num_milliseconds() as f64
            / 1000.0;
        if elapsed > self.thresholds.heartbeat_timeout_secs {
            return Some(SecurityAlert::for_event(
                event,
                Severity::Critical,
                format!("No heartbeat for {elapsed:.1} seconds"),
            ));
        }
        None
    }

    /// Anomaly scoring rule.
    ///
    /// The normalized score is stored as the session's new risk score
    /// unconditionally, even when no alert fires. A failing scorer degrades
    /// to "no scoring contribution".
    fn apply_scorer(&self, event: &SessionEvent, session: &mut Session) -> Option<SecurityAlert> {
        let scorer = self.scorer.as_ref()?;

        let in_window_tabs = session.tab_switches_within(
            self.thresholds.tab_switch_window_secs as i64,
            event.timestamp,
        );
        let features: [f64; FEATURE_LEN] = [
            session.event_count as f64,
            in_window_tabs as f64,
            session.risk_score,
            event.metadata_f64("duration").unwrap_or(0.0),
            event.metadata_f64("click_count").unwrap_or(0.0),
            event.metadata_f64("keypress_count").unwrap_or(0.0),
        ];

        let margin = match scorer.score(&features) {
            Ok(m) => m,
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "anomaly scorer failed");
                return None;
            }
        };

        let risk = normalize_margin(margin);
        session.risk_score = risk;

        if risk > self.thresholds.anomaly_threshold {
            return Some(SecurityAlert::for_event(
                event,
                Severity::High,
                format!("Anomaly scorer flagged suspicious activity (score: {risk:.2})"),
            ));
        }
        None
    }
}
