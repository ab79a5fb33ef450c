//! Daemon settings and TOML configuration parsing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level sessionguard configuration, loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Rule thresholds for the security analyzer.
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Session reaper schedule and expiry.
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Ingestion pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Persistence settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Anomaly scoring capability.
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl GuardConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Rule thresholds for the security analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Tab switches allowed within the window before alerting.
    #[serde(default = "default_tab_switch_threshold")]
    pub tab_switch_threshold: u32,
    /// Sliding window for tab-switch burst detection, in seconds.
    #[serde(default = "default_tab_switch_window")]
    pub tab_switch_window_secs: u64,
    /// Reported inactivity duration that triggers an alert, in seconds.
    #[serde(default = "default_inactivity_threshold")]
    pub inactivity_threshold_secs: f64,
    /// Silence since the last heartbeat that triggers an alert, in seconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: f64,
    /// Normalized anomaly score above which the scorer rule alerts.
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,
}

fn default_tab_switch_threshold() -> u32 {
    3
}

fn default_tab_switch_window() -> u64 {
    60
}

fn default_inactivity_threshold() -> f64 {
    30.0
}

fn default_heartbeat_timeout() -> f64 {
    10.0
}

fn default_anomaly_threshold() -> f64 {
    0.7
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            tab_switch_threshold: default_tab_switch_threshold(),
            tab_switch_window_secs: default_tab_switch_window(),
            inactivity_threshold_secs: default_inactivity_threshold(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            anomaly_threshold: default_anomaly_threshold(),
        }
    }
}

/// Session reaper schedule and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Active sessions with no heartbeat for this long are evicted.
    #[serde(default = "default_session_expiry")]
    pub session_expiry_secs: u64,
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_session_expiry() -> u64 {
    300
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            session_expiry_secs: default_session_expiry(),
        }
    }
}

/// Ingestion pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the channel between ingestion and the sink worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Persistence attempts per record before giving up.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base backoff between persistence retries, in milliseconds (doubles
    /// per attempt).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for the JSONL event and alert logs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Alerts returned by a status query.
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.local/share/sessionguard")
}

fn default_query_limit() -> usize {
    50
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            query_limit: default_query_limit(),
        }
    }
}

/// Anomaly scoring capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Whether to attach the anomaly scorer. When disabled, the scoring
    /// rule is skipped entirely and rule-based checks still run.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: GuardConfig = toml::from_str("").unwrap();
        assert_eq!(config.thresholds.tab_switch_threshold, 3);
        assert_eq!(config.thresholds.tab_switch_window_secs, 60);
        assert!((config.thresholds.inactivity_threshold_secs - 30.0).abs() < f64::EPSILON);
        assert!((config.thresholds.heartbeat_timeout_secs - 10.0).abs() < f64::EPSILON);
        assert!((config.thresholds.anomaly_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.reaper.sweep_interval_secs, 60);
        assert_eq!(config.reaper.session_expiry_secs, 300);
        assert_eq!(config.pipeline.queue_capacity, 1024);
        assert_eq!(config.store.query_limit, 50);
        assert!(config.scoring.enabled);
    }

    #[test]
    fn scoring_can_be_disabled() {
        let config: GuardConfig = toml::from_str("[scoring]\nenabled = false\n").unwrap();
        assert!(!config.scoring.enabled);
    }

    #[test]
    fn partial_section_keeps_remaining_defaults() {
        let toml_str = r#"
[thresholds]
tab_switch_threshold = 5

[reaper]
session_expiry_secs = 120
"#;
        let config: GuardConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.thresholds.tab_switch_threshold, 5);
        assert_eq!(config.thresholds.tab_switch_window_secs, 60);
        assert_eq!(config.reaper.session_expiry_secs, 120);
        assert_eq!(config.reaper.sweep_interval_secs, 60);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let config = GuardConfig::load(Path::new("/nonexistent/sessionguard.toml")).unwrap();
        assert_eq!(config.thresholds.tab_switch_threshold, 3);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[thresholds\ntab_switch_threshold = 5").unwrap();
        assert!(GuardConfig::load(&path).is_err());
    }
}
