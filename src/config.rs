//! Configuration for the replica monitor.
//!
//! This module defines all configuration types needed to run the monitor.
//! Configuration is passed to [`ReplicaMonitor::new()`](crate::ReplicaMonitor::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use replica_monitor::config::MonitorConfig;
//!
//! let config = MonitorConfig {
//!     remote_address: "http://couch.example.com:5984/notes".into(),
//!     ..Default::default()
//! };
//! assert_eq!(config.local_name(), "notes");
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! MonitorConfig
//! ├── remote_address: String         # Remote store address (also the attachment URL base)
//! ├── local_name: Option<String>     # Local store name, derived from the address if unset
//! ├── settings: MonitorSettings
//! │   ├── trigger: TriggerConfig     # heartbeat, debounce, source policy
//! │   ├── probe: ProbeConfig         # sync and snapshot timeouts, failure policy
//! │   └── error_sink: ErrorSinkConfig
//! └── replication: ReplicationSettings # live/retry flags, selector, index
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! remote_address: "http://localhost:5984/delete_me"
//!
//! settings:
//!   trigger:
//!     heartbeat: "5s"
//!     debounce: "1s"
//!     source_policy: resubscribe
//!   probe:
//!     sync_timeout: "1000ms"
//!     snapshot_timeout: "5s"
//!     snapshot_failure: keep_last
//!   error_sink:
//!     delay: "5s"
//!
//! replication:
//!   selector:
//!     type: "note"
//! ```

use crate::document::DocumentFixup;
use crate::error::{MonitorError, Result};
use crate::probe::SnapshotFailurePolicy;
use crate::replication::ReplicationOptions;
use crate::resilience::RetryConfig;
use crate::store::{IndexSpec, Selector};
use crate::trigger::SourcePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote used when none is configured.
pub const DEFAULT_REMOTE_ADDRESS: &str = "http://localhost:5984/delete_me";

/// Local name used when the remote address has no usable path segment.
pub const FALLBACK_LOCAL_NAME: &str = "unnamed";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to ReplicaMonitor::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicaMonitor::new()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Address of the remote store. Attachment URLs are built on it.
    #[serde(default = "default_remote_address")]
    pub remote_address: String,

    /// Name of the local replica. Derived from `remote_address` when unset.
    #[serde(default)]
    pub local_name: Option<String>,

    /// Timing and policy settings for the live streams.
    #[serde(default)]
    pub settings: MonitorSettings,

    /// How the two replication arms are started.
    #[serde(default)]
    pub replication: ReplicationSettings,
}

fn default_remote_address() -> String {
    DEFAULT_REMOTE_ADDRESS.to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            remote_address: default_remote_address(),
            local_name: None,
            settings: MonitorSettings::default(),
            replication: ReplicationSettings::default(),
        }
    }
}

impl MonitorConfig {
    /// Create a config for testing: default timings, fast resubscription.
    pub fn for_testing(remote_address: &str) -> Self {
        let mut config = Self {
            remote_address: remote_address.to_string(),
            ..Default::default()
        };
        config.settings.trigger.resubscribe_initial_delay = "10ms".to_string();
        config.settings.trigger.resubscribe_max_delay = "100ms".to_string();
        config
    }

    /// The local replica's name.
    ///
    /// An explicit `local_name` wins. Otherwise the last non-empty path segment
    /// of the remote address (`http://host:5984/notes/` gives `notes`), or the
    /// `host:port` when there is no path, falling back to `"unnamed"`.
    pub fn local_name(&self) -> String {
        if let Some(name) = self.local_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        derive_local_name(&self.remote_address)
    }

    /// Attachment URL fixup rooted at the remote address.
    pub fn fixup(&self) -> DocumentFixup {
        DocumentFixup::new(self.remote_address.clone())
    }

    /// Options handed to the replicator for both arms.
    pub fn replication_options(&self) -> ReplicationOptions {
        ReplicationOptions {
            live: self.replication.live,
            retry: self.replication.retry,
            selector: self.replication.selector.clone(),
        }
    }

    /// Reject configs the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.remote_address.trim().is_empty() {
            return Err(MonitorError::Config("remote_address is empty".into()));
        }

        let trigger = &self.settings.trigger;
        let heartbeat = parse_setting("settings.trigger.heartbeat", &trigger.heartbeat)?;
        if heartbeat.is_zero() {
            return Err(MonitorError::Config(
                "settings.trigger.heartbeat must be greater than zero".into(),
            ));
        }
        parse_setting("settings.trigger.debounce", &trigger.debounce)?;
        parse_setting(
            "settings.trigger.resubscribe_initial_delay",
            &trigger.resubscribe_initial_delay,
        )?;
        parse_setting(
            "settings.trigger.resubscribe_max_delay",
            &trigger.resubscribe_max_delay,
        )?;
        parse_setting("settings.probe.sync_timeout", &self.settings.probe.sync_timeout)?;
        let snapshot_timeout = parse_setting(
            "settings.probe.snapshot_timeout",
            &self.settings.probe.snapshot_timeout,
        )?;
        if snapshot_timeout.is_zero() {
            return Err(MonitorError::Config(
                "settings.probe.snapshot_timeout must be greater than zero".into(),
            ));
        }
        parse_setting("settings.error_sink.delay", &self.settings.error_sink.delay)?;

        if let Some(index) = &self.replication.index {
            if index.fields.is_empty() {
                return Err(MonitorError::Config(
                    "replication.index needs at least one field".into(),
                ));
            }
        }
        Ok(())
    }
}

fn derive_local_name(remote_address: &str) -> String {
    let without_scheme = remote_address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(remote_address);
    let path = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    // With no path the authority (host:port) is the last segment.
    path.split('/')
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_LOCAL_NAME.to_string())
}

fn parse_setting(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| MonitorError::Config(format!("{field}: invalid duration {value:?}: {e}")))
}

fn parse_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// MonitorSettings: trigger, probe and error sink config
// ═══════════════════════════════════════════════════════════════════════════════

/// Timing and policy settings for the live streams.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub error_sink: ErrorSinkConfig,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TriggerConfig: heartbeat, debounce and source termination policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Trigger aggregator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Heartbeat period as a duration string (e.g., "5s").
    /// The first heartbeat fires one period after subscription.
    #[serde(default = "default_heartbeat")]
    pub heartbeat: String,

    /// Quiet period before a tick is emitted (e.g., "1s").
    #[serde(default = "default_debounce")]
    pub debounce: String,

    /// What to do when a trigger source terminates.
    #[serde(default)]
    pub source_policy: SourcePolicy,

    /// First resubscription delay.
    #[serde(default = "default_resubscribe_initial_delay")]
    pub resubscribe_initial_delay: String,

    /// Ceiling for the resubscription backoff.
    #[serde(default = "default_resubscribe_max_delay")]
    pub resubscribe_max_delay: String,

    /// Give up on a source after this many consecutive failed openings.
    /// `None` retries forever.
    #[serde(default)]
    pub resubscribe_max_attempts: Option<usize>,
}

fn default_heartbeat() -> String {
    "5s".to_string()
}

fn default_debounce() -> String {
    "1s".to_string()
}

fn default_resubscribe_initial_delay() -> String {
    "1s".to_string()
}

fn default_resubscribe_max_delay() -> String {
    "5min".to_string()
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            heartbeat: default_heartbeat(),
            debounce: default_debounce(),
            source_policy: SourcePolicy::default(),
            resubscribe_initial_delay: default_resubscribe_initial_delay(),
            resubscribe_max_delay: default_resubscribe_max_delay(),
            resubscribe_max_attempts: None,
        }
    }
}

impl TriggerConfig {
    /// Parse the heartbeat string to a Duration (fallback 5s).
    pub fn heartbeat_duration(&self) -> Duration {
        parse_or(&self.heartbeat, Duration::from_secs(5))
    }

    /// Parse the debounce string to a Duration (fallback 1s).
    pub fn debounce_duration(&self) -> Duration {
        parse_or(&self.debounce, Duration::from_secs(1))
    }

    /// Backoff used when `source_policy` is `Resubscribe`.
    pub fn retry_config(&self) -> RetryConfig {
        let base = RetryConfig::daemon();
        RetryConfig {
            max_attempts: self.resubscribe_max_attempts.unwrap_or(base.max_attempts),
            initial_delay: parse_or(&self.resubscribe_initial_delay, base.initial_delay),
            max_delay: parse_or(&self.resubscribe_max_delay, base.max_delay),
            backoff_factor: base.backoff_factor,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ProbeConfig: sync ratio timeout and snapshot policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Probe configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Timeout for the combined local + remote `info()` fetch.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout: String,

    /// Timeout for one snapshot or view fetch. Elapsed fetches go through
    /// `snapshot_failure` like any other store error.
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout: String,

    /// What a failed `list_all` does to the documents stream.
    #[serde(default)]
    pub snapshot_failure: SnapshotFailurePolicy,

    /// Documents whose id starts with this prefix are hidden from snapshots.
    /// An empty prefix hides nothing.
    #[serde(default = "default_internal_id_prefix")]
    pub internal_id_prefix: String,
}

fn default_sync_timeout() -> String {
    "1000ms".to_string()
}

fn default_snapshot_timeout() -> String {
    "5s".to_string()
}

fn default_internal_id_prefix() -> String {
    "_d".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            sync_timeout: default_sync_timeout(),
            snapshot_timeout: default_snapshot_timeout(),
            snapshot_failure: SnapshotFailurePolicy::default(),
            internal_id_prefix: default_internal_id_prefix(),
        }
    }
}

impl ProbeConfig {
    /// Parse the sync timeout (fallback 1000ms).
    pub fn sync_timeout_duration(&self) -> Duration {
        parse_or(&self.sync_timeout, Duration::from_millis(1000))
    }

    /// Parse the snapshot timeout (fallback 5s).
    pub fn snapshot_timeout_duration(&self) -> Duration {
        parse_or(&self.snapshot_timeout, Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ErrorSinkConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Replication error sink configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSinkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay before an error is forwarded to the reporter.
    #[serde(default = "default_error_delay")]
    pub delay: String,
}

fn default_true() -> bool {
    true
}

fn default_error_delay() -> String {
    "5s".to_string()
}

impl Default for ErrorSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: default_error_delay(),
        }
    }
}

impl ErrorSinkConfig {
    /// Parse the delay (fallback 5s).
    pub fn delay_duration(&self) -> Duration {
        parse_or(&self.delay, Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings: how the arms are started
// ═══════════════════════════════════════════════════════════════════════════════

/// Replication arm settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSettings {
    #[serde(default = "default_true")]
    pub live: bool,

    #[serde(default = "default_true")]
    pub retry: bool,

    /// Replicate only documents matching this selector.
    #[serde(default)]
    pub selector: Option<Selector>,

    /// Index created on the local store at start.
    /// With a selector and no explicit index, one is built from the selector's fields.
    #[serde(default)]
    pub index: Option<IndexSpec>,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            live: true,
            retry: true,
            selector: None,
            index: None,
        }
    }
}

impl ReplicationSettings {
    /// The index to create at start, if any.
    pub fn startup_index(&self) -> Option<IndexSpec> {
        if let Some(index) = &self.index {
            return Some(index.clone());
        }
        let selector = self.selector.as_ref()?;
        let fields: Vec<String> = selector
            .keys()
            .filter(|k| !k.starts_with('$'))
            .cloned()
            .collect();
        if fields.is_empty() {
            return None;
        }
        Some(IndexSpec { fields, name: None })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
