//! Periodic eviction of ended and stale sessions.
//!
//! Runs independently of the ingestion path on a fixed interval. Each sweep
//! works from a point-in-time snapshot and re-checks every candidate under
//! its entry lock before removing it, so a session that restarts or
//! heartbeats mid-sweep stays put. The task is cancellable and integrated
//! with daemon shutdown; an in-flight sweep completes without corrupting
//! the table.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sessionguard_core::config::ReaperConfig;
use sessionguard_core::session::{SessionStatus, SessionTable};

/// Background task evicting ended/expired sessions from the table.
pub struct SessionReaper {
    table: Arc<SessionTable>,
    config: ReaperConfig,
}

impl SessionReaper {
    pub fn new(table: Arc<SessionTable>, config: ReaperConfig) -> Self {
        Self { table, config }
    }

    /// Spawn the reaper loop. Cancelling the token stops it cleanly.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
            let expiry = chrono::Duration::seconds(self.config.session_expiry_secs as i64);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = sweep_once(&self.table, expiry, Utc::now());
                        if removed > 0 {
                            info!(removed, remaining = self.table.len(), "reaped sessions");
                        }
                    }
                    _ = cancel.cancelled() => {
                        debug!("reaper shut down");
                        break;
                    }
                }
            }
        })
    }
}

/// One sweep over the table: remove sessions that have ended, or whose last
/// heartbeat is older than `expiry` relative to `now`. Returns the number
/// removed.
///
/// The removal predicate is re-evaluated under the entry lock, which makes
/// the sweep race-safe against concurrent `apply` calls: a row that changed
/// since the snapshot is only removed if it still qualifies.
pub fn sweep_once(table: &SessionTable, expiry: chrono::Duration, now: DateTime<Utc>) -> usize {
    let mut removed = 0;
    for session in table.snapshot() {
        let qualifies = |s: &sessionguard_core::session::Session| {
            s.status == SessionStatus::Ended || now.signed_duration_since(s.last_heartbeat) > expiry
        };
        if qualifies(&session) && table.remove_if(&session.session_id, qualifies) {
            removed += 1;
            debug!(session_id = %session.session_id, status = %session.status, "evicted session");
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const EXPIRY_SECS: i64 = 300;

    fn expiry() -> ChronoDuration {
        ChronoDuration::seconds(EXPIRY_SECS)
    }

    #[test]
    fn ended_session_is_removed_even_with_fresh_heartbeat() {
        let table = SessionTable::new();
        let now = Utc::now();
        table.upsert_start("s1", "u1", now);
        table.apply("s1", |s| s.status = SessionStatus::Ended);

        assert_eq!(sweep_once(&table, expiry(), now), 1);
        assert!(table.get("s1").is_none());
    }

    #[test]
    fn stale_active_session_is_removed_at_301s() {
        let table = SessionTable::new();
        let now = Utc::now();
        table.upsert_start("s1", "u1", now - ChronoDuration::seconds(301));

        assert_eq!(sweep_once(&table, expiry(), now), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn active_session_at_299s_is_retained() {
        let table = SessionTable::new();
        let now = Utc::now();
        table.upsert_start("s1", "u1", now - ChronoDuration::seconds(299));

        assert_eq!(sweep_once(&table, expiry(), now), 0);
        assert!(table.get("s1").is_some());
    }

    #[test]
    fn sweep_handles_mixed_population() {
        let table = SessionTable::new();
        let now = Utc::now();
        table.upsert_start("fresh", "u1", now);
        table.upsert_start("stale", "u2", now - ChronoDuration::seconds(400));
        table.upsert_start("done", "u3", now);
        table.apply("done", |s| s.status = SessionStatus::Ended);

        assert_eq!(sweep_once(&table, expiry(), now), 2);
        assert!(table.get("fresh").is_some());
        assert!(table.get("stale").is_none());
        assert!(table.get("done").is_none());
    }

    #[test]
    fn restarted_session_survives_a_stale_snapshot() {
        let table = SessionTable::new();
        let now = Utc::now();
        table.upsert_start("s1", "u1", now - ChronoDuration::seconds(400));

        // Simulate a restart between the snapshot and the removal: the
        // predicate re-check sees the fresh row and leaves it alone.
        let snapshot = table.snapshot();
        table.upsert_start("s1", "u1", now);
        let mut removed = 0;
        for session in snapshot {
            if table.remove_if(&session.session_id, |live| {
                live.status == SessionStatus::Ended
                    || now.signed_duration_since(live.last_heartbeat) > expiry()
            }) {
                removed += 1;
            }
        }
        assert_eq!(removed, 0);
        assert!(table.get("s1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_reaper_sweeps_on_interval_and_cancels_cleanly() {
        let table = Arc::new(SessionTable::new());
        table.upsert_start("s1", "u1", Utc::now());
        table.apply("s1", |s| s.status = SessionStatus::Ended);

        let cancel = CancellationToken::new();
        let config = ReaperConfig {
            sweep_interval_secs: 1,
            session_expiry_secs: 300,
        };
        let handle = SessionReaper::new(Arc::clone(&table), config).spawn(cancel.clone());

        // The first tick fires immediately; give the task a moment to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(table.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
