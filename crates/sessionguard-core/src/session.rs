//! Session state and the concurrent session table.
//!
//! The table is the single source of truth for live sessions. It is keyed by
//! session id and guarantees that mutations to the same id are serialized
//! while unrelated sessions proceed in parallel (sharded locking, no global
//! lock).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked session.
///
/// `Ended` is terminal for the status field; the row itself is only removed
/// by the reaper, never by the ingestion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Ended => f.write_str("ended"),
        }
    }
}

/// A tracked monitoring period for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: SessionStatus,
    /// Current suspicion level in `[0, 1]`.
    pub risk_score: f64,
    /// Monotonically non-decreasing count of events applied to this session.
    pub event_count: u64,
    /// Recent tab-switch times; pruned to the sliding window by the analyzer.
    pub tab_switch_timestamps: Vec<DateTime<Utc>>,
}

impl Session {
    /// A fresh Active session as created by a `session_start` event.
    pub fn new(session_id: String, user_id: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id,
            user_id,
            start_time: timestamp,
            last_heartbeat: timestamp,
            status: SessionStatus::Active,
            risk_score: 0.0,
            event_count: 0,
            tab_switch_timestamps: Vec::new(),
        }
    }

    /// Count of tab switches within `window` seconds before `now`, inclusive
    /// of `now` itself.
    pub fn tab_switches_within(&self, window_secs: i64, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::seconds(window_secs);
        self.tab_switch_timestamps
            .iter()
            .filter(|ts| **ts > cutoff)
            .count()
    }
}

/// Concurrency-safe keyed store of session state.
///
/// Mutations to a given id are serialized relative to each other via the
/// shard entry lock; closures passed to [`apply`](Self::apply) run under
/// that lock and must stay free of I/O.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reinitialize) a session for a `session_start` event.
    ///
    /// A duplicate start for a live id replaces the row with a fresh Active
    /// session.
    pub fn upsert_start(&self, session_id: &str, user_id: &str, timestamp: DateTime<Utc>) {
        self.sessions.insert(
            session_id.to_string(),
            Session::new(session_id.to_string(), user_id.to_string(), timestamp),
        );
    }

    /// Clone-out snapshot of a single session.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    /// Atomic read-modify-write for one session.
    ///
    /// Returns `None` for an unknown id without creating an entry; only
    /// `session_start` creates entries.
    pub fn apply<T>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        self.sessions
            .get_mut(session_id)
            .map(|mut entry| f(entry.value_mut()))
    }

    /// Remove a session unconditionally.
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }

    /// Remove a session only if `pred` holds under the entry lock.
    ///
    /// This re-checks the predicate against the live row, so it is race-safe
    /// against concurrent [`apply`](Self::apply) calls working from a stale
    /// snapshot.
    pub fn remove_if(&self, session_id: &str, pred: impl FnOnce(&Session) -> bool) -> bool {
        self.sessions
            .remove_if(session_id, |_, session| pred(session))
            .is_some()
    }

    /// Consistent point-in-time copy of all sessions, for the reaper's sweep.
    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn upsert_start_creates_fresh_active_session() {
        let table = SessionTable::new();
        let now = Utc::now();
        table.upsert_start("s1", "u1", now);

        let session = table.get("s1").unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.risk_score, 0.0);
        assert_eq!(session.event_count, 0);
        assert!(session.tab_switch_timestamps.is_empty());
        assert_eq!(session.last_heartbeat, now);
    }

    #[test]
    fn duplicate_start_reinitializes() {
        let table = SessionTable::new();
        let t0 = Utc::now();
        table.upsert_start("s1", "u1", t0);
        table.apply("s1", |s| s.event_count = 7).unwrap();

        let t1 = t0 + chrono::Duration::seconds(5);
        table.upsert_start("s1", "u1", t1);
        let session = table.get("s1").unwrap();
        assert_eq!(session.event_count, 0);
        assert_eq!(session.start_time, t1);
    }

    #[test]
    fn apply_on_unknown_id_returns_none_and_creates_nothing() {
        let table = SessionTable::new();
        assert!(table.apply("ghost", |s| s.event_count += 1).is_none());
        assert!(table.get("ghost").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn remove_if_respects_predicate() {
        let table = SessionTable::new();
        table.upsert_start("s1", "u1", Utc::now());

        assert!(!table.remove_if("s1", |s| s.status == SessionStatus::Ended));
        assert!(table.get("s1").is_some());

        table.apply("s1", |s| s.status = SessionStatus::Ended);
        assert!(table.remove_if("s1", |s| s.status == SessionStatus::Ended));
        assert!(table.get("s1").is_none());
    }

    #[test]
    fn remove_if_on_unknown_id_is_false() {
        let table = SessionTable::new();
        assert!(!table.remove_if("ghost", |_| true));
    }

    #[test]
    fn remove_returns_the_evicted_session() {
        let table = SessionTable::new();
        table.upsert_start("s1", "u1", Utc::now());

        let removed = table.remove("s1").unwrap();
        assert_eq!(removed.user_id, "u1");
        assert!(table.get("s1").is_none());
        assert!(table.remove("s1").is_none());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let table = SessionTable::new();
        table.upsert_start("s1", "u1", Utc::now());
        table.upsert_start("s2", "u2", Utc::now());

        let snap = table.snapshot();
        assert_eq!(snap.len(), 2);

        // Mutating after the snapshot does not affect the copy.
        table.apply("s1", |s| s.event_count = 99);
        assert!(snap.iter().all(|s| s.event_count == 0));
    }

    #[test]
    fn tab_switches_within_is_a_sliding_window() {
        let t0 = Utc::now();
        let mut session = Session::new("s1".into(), "u1".into(), t0);
        for secs in [0, 5, 10] {
            session
                .tab_switch_timestamps
                .push(t0 + chrono::Duration::seconds(secs));
        }
        assert_eq!(session.tab_switches_within(60, t0 + chrono::Duration::seconds(15)), 3);
        // At t=100 only entries newer than t=40 remain in-window.
        assert_eq!(session.tab_switches_within(60, t0 + chrono::Duration::seconds(100)), 0);
    }

    #[test]
    fn concurrent_applies_do_not_lose_updates() {
        let table = Arc::new(SessionTable::new());
        table.upsert_start("s1", "u1", Utc::now());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    table.apply("s1", |s| s.event_count += 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(table.get("s1").unwrap().event_count, 3200);
    }

    #[test]
    fn independent_sessions_do_not_interfere() {
        let table = Arc::new(SessionTable::new());
        table.upsert_start("a", "u1", Utc::now());
        table.upsert_start("b", "u2", Utc::now());

        let ta = Arc::clone(&table);
        let ha = std::thread::spawn(move || {
            for _ in 0..500 {
                ta.apply("a", |s| s.event_count += 1);
            }
        });
        let tb = Arc::clone(&table);
        let hb = std::thread::spawn(move || {
            for _ in 0..500 {
                tb.apply("b", |s| s.event_count += 1);
            }
        });
        ha.join().unwrap();
        hb.join().unwrap();

        assert_eq!(table.get("a").unwrap().event_count, 500);
        assert_eq!(table.get("b").unwrap().event_count, 500);
    }
}
