//! Domain records shared by the engine, the dispatcher and the read models

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type MonitorId = String;
pub type GroupId = String;

/// Health of a monitored target as seen by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Online,
    Offline,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Online => write!(f, "Online"),
            HealthStatus::Offline => write!(f, "Offline"),
            HealthStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How a monitor is probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    #[default]
    Http,
    Tcp,
}

/// A grouping of monitors, also the unit of status pages and reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    /// Addresses alerted for this group's monitors; empty falls back to the global list
    #[serde(default)]
    pub alert_recipients: Vec<String>,
}

/// A monitored site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: MonitorId,
    pub name: String,
    /// URL for HTTP probes, `host:port` for TCP probes
    pub target: String,
    #[serde(default)]
    pub kind: ProbeKind,
    pub group_id: GroupId,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

/// Outcome of a single probe, immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub monitor_id: MonitorId,
    pub at: DateTime<Utc>,
    pub success: bool,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn success(monitor_id: &str, at: DateTime<Utc>, response_time_ms: u64) -> Self {
        Self {
            monitor_id: monitor_id.to_string(),
            at,
            success: true,
            response_time_ms: Some(response_time_ms),
            error: None,
        }
    }

    pub fn failure(monitor_id: &str, at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            monitor_id: monitor_id.to_string(),
            at,
            success: false,
            response_time_ms: None,
            error: Some(error.into()),
        }
    }
}

/// Persisted health of one monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorState {
    pub monitor_id: MonitorId,
    pub status: HealthStatus,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_response_time_ms: Option<u64>,
}

impl MonitorState {
    pub fn unknown(monitor_id: &str) -> Self {
        Self {
            monitor_id: monitor_id.to_string(),
            status: HealthStatus::Unknown,
            last_transition_at: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_probe_at: None,
            last_response_time_ms: None,
        }
    }
}

/// A bounded interval during which a monitor was offline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub monitor_id: MonitorId,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub transition_id: Uuid,
    pub error: Option<String>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// The notification-worthy fact that a monitor's state changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub id: Uuid,
    pub monitor_id: MonitorId,
    pub from: HealthStatus,
    pub to: HealthStatus,
    pub at: DateTime<Utc>,
    /// Incident opened or closed by this transition
    pub incident_id: Option<Uuid>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Sent,
    Retrying,
    Failed,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Sent => write!(f, "sent"),
            AttemptOutcome::Retrying => write!(f, "retrying"),
            AttemptOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// One delivery attempt for a transition's alert email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub transition_id: Uuid,
    pub monitor_id: MonitorId,
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
}

/// Monthly emailing of one group's report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReportConfig {
    pub id: Uuid,
    pub group_id: GroupId,
    pub recipients: Vec<String>,
    /// Day of the month, 1 to 28, on which the previous month's report goes out
    pub send_day: u32,
    pub enabled: bool,
}

/// One monthly report delivery, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReportRecord {
    pub id: Uuid,
    /// Absent for reports sent on demand
    pub config_id: Option<Uuid>,
    pub group_id: GroupId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub recipients: Vec<String>,
    pub at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
}

/// Transport protection for the SMTP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    /// Plain TCP; credentials are never sent
    #[default]
    None,
    /// Plain connect upgraded with STARTTLS before AUTH
    Starttls,
    /// TLS from the first byte (SMTPS, usually port 465)
    Tls,
}

/// Outgoing mail server settings, stored as given and checked only at send time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub security: SmtpSecurity,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from_address: String,
    #[serde(default)]
    pub from_name: String,
}

impl SmtpSettings {
    /// Copy with the password blanked, for API responses
    pub fn redacted(&self) -> Self {
        let password = if self.password.is_empty() {
            String::new()
        } else {
            "********".to_string()
        };
        Self {
            password,
            ..self.clone()
        }
    }
}

fn default_true() -> bool {
    true
}
