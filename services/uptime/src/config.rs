//! Configuration types for the uptime service

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{Group, Monitor, ProbeKind, SmtpSettings};
use crate::smtp::validate_address;
use crate::{Result, UptimeError};

/// Environment variable that overrides `server.token_secret`
pub const TOKEN_SECRET_ENV: &str = "UPTIME_TOKEN_SECRET";

/// Shortest accepted probe interval and timeout
pub const MIN_PROBE_PERIOD: Duration = Duration::from_secs(1);

/// Name of the store snapshot inside `storage.data_dir`
pub const SNAPSHOT_FILE: &str = "uptime-store.json";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Initial SMTP settings; the API can replace them at runtime
    #[serde(default)]
    pub smtp: Option<SmtpSettings>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
}

/// A monitor as written in the config file; unset timings fall back to `engine`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub id: String,
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub kind: ProbeKind,
    pub group_id: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

impl MonitorConfig {
    pub fn to_monitor(&self, engine: &EngineConfig) -> Monitor {
        Monitor {
            id: self.id.clone(),
            name: self.name.clone(),
            target: self.target.clone(),
            kind: self.kind,
            group_id: self.group_id.clone(),
            active: self.active,
            interval: self.interval.unwrap_or(engine.default_interval),
            timeout: self.timeout.unwrap_or(engine.default_timeout),
            notifications_enabled: self.notifications_enabled,
        }
    }
}

/// Scheduler and state machine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Consecutive same-outcome probes needed to change state
    #[serde(default = "default_debounce_threshold")]
    pub debounce_threshold: u32,
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub default_interval: Duration,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Probe results older than this are pruned
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,
    #[serde(default = "default_retention_sweep", with = "humantime_serde")]
    pub retention_sweep: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_threshold: default_debounce_threshold(),
            default_interval: default_interval(),
            default_timeout: default_timeout(),
            retention: default_retention(),
            retention_sweep: default_retention_sweep(),
        }
    }
}

/// Alert delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Total delivery attempts per transition, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Bound on each SMTP connect/command round trip
    #[serde(default = "default_smtp_timeout", with = "humantime_serde")]
    pub smtp_timeout: Duration,
    /// Fallback recipients for groups without their own list
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Where SMTP settings saved through the API are kept across restarts
    #[serde(default)]
    pub smtp_settings_file: Option<PathBuf>,
    /// PEM bundle trusted for SMTP TLS in addition to the platform roots
    #[serde(default)]
    pub smtp_ca_file: Option<PathBuf>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffConfig::default(),
            smtp_timeout: default_smtp_timeout(),
            recipients: Vec::new(),
            smtp_settings_file: None,
            smtp_ca_file: None,
        }
    }
}

/// Delay policy between delivery attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BackoffConfig {
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Exponential {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffConfig {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            BackoffConfig::Fixed { delay } => *delay,
            BackoffConfig::Exponential { initial, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                initial.saturating_mul(1u32 << shift).min(*max)
            }
        }
    }
}

/// API server and access gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// HMAC secret for bearer tokens
    #[serde(default)]
    pub token_secret: String,
    #[serde(default = "default_token_ttl", with = "humantime_serde")]
    pub token_ttl: Duration,
    /// Reverse proxies whose `X-Forwarded-For` header names the real client
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            allowed_origins: default_allowed_origins(),
            rate_limit: RateLimitConfig::default(),
            token_secret: String::new(),
            token_ttl: default_token_ttl(),
            trusted_proxies: Vec::new(),
        }
    }
}

/// Per-client request budget over a sliding window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_rate_window", with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window: default_rate_window(),
        }
    }
}

/// Public status page settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_recent_incidents")]
    pub recent_incidents: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            recent_incidents: default_recent_incidents(),
        }
    }
}

/// Where runtime state survives restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the store snapshot; unset keeps everything in memory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_snapshot_interval", with = "humantime_serde")]
    pub snapshot_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            snapshot_interval: default_snapshot_interval(),
        }
    }
}

impl StorageConfig {
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(SNAPSHOT_FILE))
    }
}

/// Monthly report emails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// UTC hour on the send day from which a monthly report is due
    #[serde(default = "default_send_hour")]
    pub send_hour: u32,
    /// How often due monthly reports are looked for
    #[serde(default = "default_report_check", with = "humantime_serde")]
    pub check_every: Duration,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            send_hour: default_send_hour(),
            check_every: default_report_check(),
        }
    }
}

/// Probe interval and timeout must each be at least [`MIN_PROBE_PERIOD`]
pub fn validate_timings(interval: Duration, timeout: Duration) -> Result<()> {
    if interval < MIN_PROBE_PERIOD || timeout < MIN_PROBE_PERIOD {
        return Err(UptimeError::Validation(format!(
            "interval and timeout must be at least {:?} (got {:?} and {:?})",
            MIN_PROBE_PERIOD, interval, timeout
        )));
    }
    Ok(())
}

impl Config {
    /// Apply secrets from the environment
    pub fn resolve_secrets(&mut self) -> Result<()> {
        if let Ok(secret) = std::env::var(TOKEN_SECRET_ENV) {
            if !secret.is_empty() {
                tracing::debug!("Using token secret from {}", TOKEN_SECRET_ENV);
                self.server.token_secret = secret;
            }
        }
        Ok(())
    }

    /// Check cross-references and bounds that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.engine.debounce_threshold == 0 {
            return Err(UptimeError::Config(
                "engine.debounce_threshold must be at least 1".to_string(),
            ));
        }
        if self.notifications.max_attempts == 0 {
            return Err(UptimeError::Config(
                "notifications.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.server.rate_limit.max_requests == 0 || self.server.rate_limit.window.is_zero() {
            return Err(UptimeError::Config(
                "server.rate_limit needs a positive max_requests and window".to_string(),
            ));
        }
        validate_timings(self.engine.default_interval, self.engine.default_timeout)
            .map_err(|e| UptimeError::Config(format!("engine defaults: {}", e)))?;
        if self.storage.snapshot_interval.is_zero() || self.reports.check_every.is_zero() {
            return Err(UptimeError::Config(
                "storage.snapshot_interval and reports.check_every must be positive".to_string(),
            ));
        }
        if self.reports.send_hour > 23 {
            return Err(UptimeError::Config(
                "reports.send_hour must be between 0 and 23".to_string(),
            ));
        }
        for address in &self.notifications.recipients {
            validate_address(address)
                .map_err(|e| UptimeError::Config(format!("notifications.recipients: {}", e)))?;
        }
        if self.server.token_secret.is_empty() {
            return Err(UptimeError::Config(format!(
                "server.token_secret is empty; set it in the config file or via {}",
                TOKEN_SECRET_ENV
            )));
        }

        let mut names: Vec<String> = self.groups.iter().map(|g| g.name.to_lowercase()).collect();
        names.sort();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(UptimeError::Config(format!(
                "duplicate group name '{}'",
                dup[0]
            )));
        }

        let mut ids: Vec<&str> = self.monitors.iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(dup) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(UptimeError::Config(format!(
                "duplicate monitor id '{}'",
                dup[0]
            )));
        }

        for group in &self.groups {
            for address in &group.alert_recipients {
                validate_address(address)
                    .map_err(|e| UptimeError::Config(format!("group '{}': {}", group.id, e)))?;
            }
        }

        for monitor in &self.monitors {
            if !self.groups.iter().any(|g| g.id == monitor.group_id) {
                return Err(UptimeError::Config(format!(
                    "monitor '{}' references unknown group '{}'",
                    monitor.id, monitor.group_id
                )));
            }
            let resolved = monitor.to_monitor(&self.engine);
            validate_timings(resolved.interval, resolved.timeout)
                .map_err(|e| UptimeError::Config(format!("monitor '{}': {}", monitor.id, e)))?;
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_debounce_threshold() -> u32 {
    2
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_retention() -> Duration {
    Duration::from_secs(30 * 24 * 3600)
}

fn default_retention_sweep() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_smtp_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_port() -> u16 {
    8081
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

fn default_max_requests() -> u32 {
    1000
}

fn default_rate_window() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_token_ttl() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_recent_incidents() -> usize {
    10
}

fn default_snapshot_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_send_hour() -> u32 {
    9
}

fn default_report_check() -> Duration {
    Duration::from_secs(15 * 60)
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        UptimeError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
