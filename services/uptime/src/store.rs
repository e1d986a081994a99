//! Shared store for the monitor catalog, probe history, incidents and attempt log
//!
//! Probe results, incidents and notification attempts are append-only; only
//! the per-monitor `MonitorState` and an incident's `closed_at` are ever
//! updated, and only through `record_transition`.
//!
//! With a data directory configured the whole store is written to a JSON
//! snapshot, replaced atomically, and read back on the next start.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::validate_timings;
use crate::health::Transition;
use crate::model::{
    AttemptOutcome, Group, HealthStatus, Incident, Monitor, MonitorId, MonitorState, MonthlyReportConfig, MonthlyReportRecord, NotificationAttempt, ProbeResult,
    SmtpSettings, TransitionEvent,
};
use crate::smtp::validate_address;
use crate::{Result, UptimeError};

/// Request body for creating a group
#[derive(Debug, Clone, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub alert_recipients: Vec<String>,
}

/// Request body for scheduling a group's monthly report
#[derive(Debug, Clone, Deserialize)]
pub struct NewReportConfig {
    /// Group id or slug
    pub group_id: String,
    pub recipients: Vec<String>,
    pub send_day: u32,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Partial update of a monthly report schedule
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfigUpdate {
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
    #[serde(default)]
    pub send_day: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    groups: Vec<Group>,
    monitors: Vec<Monitor>,
    states: HashMap<MonitorId, MonitorState>,
    probes: HashMap<MonitorId, Vec<ProbeResult>>,
    incidents: Vec<Incident>,
    attempts: Vec<NotificationAttempt>,
    smtp: Option<SmtpSettings>,
    report_configs: Vec<MonthlyReportConfig>,
    report_history: Vec<MonthlyReportRecord>,
}

/// Names end up in email subjects and PDF text
fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(UptimeError::Validation(format!(
            "{} name must not be empty",
            kind
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(UptimeError::Validation(format!(
            "{} name must not contain control characters",
            kind
        )));
    }
    Ok(())
}

fn validate_recipients(recipients: &[String]) -> Result<()> {
    recipients.iter().try_for_each(|r| validate_address(r))
}

fn validate_send_day(day: u32) -> Result<()> {
    if !(1..=28).contains(&day) {
        return Err(UptimeError::Validation(format!(
            "send_day must be between 1 and 28, got {}",
            day
        )));
    }
    Ok(())
}

impl Store {
    pub fn new(groups: Vec<Group>, monitors: Vec<Monitor>, smtp: Option<SmtpSettings>) -> Self {
        Self {
            groups,
            monitors,
            smtp,
            ..Self::default()
        }
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Find a group by id or by slug
    pub fn find_group(&self, reference: &str) -> Option<&Group> {
        self.group(reference).or_else(|| {
            self.groups
                .iter()
                .find(|g| g.slug.as_deref() == Some(reference))
        })
    }

    pub fn create_group(&mut self, new: NewGroup) -> Result<Group> {
        let name = new.name.trim();
        validate_name("group", name)?;
        validate_recipients(&new.alert_recipients)?;
        if self
            .groups
            .iter()
            .any(|g| g.name.eq_ignore_ascii_case(name))
        {
            return Err(UptimeError::Conflict(format!(
                "a group named '{}' already exists",
                name
            )));
        }
        if let Some(slug) = &new.slug {
            if self.find_group(slug).is_some() {
                return Err(UptimeError::Conflict(format!(
                    "slug '{}' is already in use",
                    slug
                )));
            }
        }

        let group = Group {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            slug: new.slug,
            description: new.description,
            notifications_enabled: true,
            alert_recipients: new.alert_recipients,
        };
        tracing::info!("Created group '{}' ({})", group.name, group.id);
        self.groups.push(group.clone());
        Ok(group)
    }

    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    pub fn monitor(&self, id: &str) -> Option<&Monitor> {
        self.monitors.iter().find(|m| m.id == id)
    }

    pub fn monitors_in_group(&self, group_id: &str) -> Vec<&Monitor> {
        self.monitors
            .iter()
            .filter(|m| m.group_id == group_id)
            .collect()
    }

    pub fn add_monitor(&mut self, monitor: Monitor) -> Result<()> {
        validate_name("monitor", &monitor.name)?;
        validate_timings(monitor.interval, monitor.timeout)?;
        if monitor.target.trim().is_empty() {
            return Err(UptimeError::Validation(
                "monitor target must not be empty".to_string(),
            ));
        }
        if self.group(&monitor.group_id).is_none() {
            return Err(UptimeError::Validation(format!(
                "unknown group '{}'",
                monitor.group_id
            )));
        }
        if self.monitor(&monitor.id).is_some() {
            return Err(UptimeError::Conflict(format!(
                "monitor '{}' already exists",
                monitor.id
            )));
        }
        tracing::info!("Added monitor '{}' -> {}", monitor.name, monitor.target);
        self.monitors.push(monitor);
        Ok(())
    }

    /// Current state, `Unknown` for monitors never observed
    pub fn state(&self, monitor_id: &str) -> MonitorState {
        self.states
            .get(monitor_id)
            .cloned()
            .unwrap_or_else(|| MonitorState::unknown(monitor_id))
    }

    pub fn put_state(&mut self, state: MonitorState) {
        self.states.insert(state.monitor_id.clone(), state);
    }

    pub fn record_probe(&mut self, result: ProbeResult) {
        self.probes
            .entry(result.monitor_id.clone())
            .or_default()
            .push(result);
    }

    /// Probe results of one monitor with `start <= at < end`
    pub fn probe_results(
        &self,
        monitor_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<&ProbeResult> {
        self.probes
            .get(monitor_id)
            .map(|results| {
                results
                    .iter()
                    .filter(|r| r.at >= start && r.at < end)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Persist an accepted transition: new state, then open or close the incident
    pub fn record_transition(
        &mut self,
        monitor_id: &str,
        transition: &Transition,
        state: MonitorState,
        error: Option<String>,
    ) -> TransitionEvent {
        let transition_id = Uuid::new_v4();
        self.put_state(state);

        let incident_id = match transition.to {
            HealthStatus::Offline => match self.open_incident(monitor_id) {
                Some(open) => Some(open.id),
                None => {
                    let incident = Incident {
                        id: Uuid::new_v4(),
                        monitor_id: monitor_id.to_string(),
                        opened_at: transition.at,
                        closed_at: None,
                        transition_id,
                        error: error.clone(),
                    };
                    tracing::info!("Opened incident {} for '{}'", incident.id, monitor_id);
                    let id = incident.id;
                    self.incidents.push(incident);
                    Some(id)
                }
            },
            HealthStatus::Online => {
                let open = self
                    .incidents
                    .iter_mut()
                    .find(|i| i.monitor_id == monitor_id && i.is_open());
                open.map(|incident| {
                    incident.closed_at = Some(transition.at);
                    tracing::info!("Closed incident {} for '{}'", incident.id, monitor_id);
                    incident.id
                })
            }
            HealthStatus::Unknown => None,
        };

        TransitionEvent {
            id: transition_id,
            monitor_id: monitor_id.to_string(),
            from: transition.from,
            to: transition.to,
            at: transition.at,
            incident_id,
            error,
        }
    }

    pub fn incidents(&self) -> &[Incident] {
        &self.incidents
    }

    pub fn incident(&self, id: Uuid) -> Option<&Incident> {
        self.incidents.iter().find(|i| i.id == id)
    }

    pub fn open_incident(&self, monitor_id: &str) -> Option<&Incident> {
        self.incidents
            .iter()
            .find(|i| i.monitor_id == monitor_id && i.is_open())
    }

    pub fn incidents_for(&self, monitor_id: &str) -> Vec<&Incident> {
        self.incidents
            .iter()
            .filter(|i| i.monitor_id == monitor_id)
            .collect()
    }

    pub fn add_attempt(&mut self, attempt: NotificationAttempt) {
        self.attempts.push(attempt);
    }

    pub fn attempts(&self) -> &[NotificationAttempt] {
        &self.attempts
    }

    pub fn attempts_for_transition(&self, transition_id: Uuid) -> Vec<&NotificationAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.transition_id == transition_id)
            .collect()
    }

    pub fn smtp_settings(&self) -> Option<&SmtpSettings> {
        self.smtp.as_ref()
    }

    pub fn set_smtp_settings(&mut self, settings: SmtpSettings) {
        tracing::info!(
            "SMTP settings updated: {}:{} as '{}'",
            settings.host,
            settings.port,
            settings.from_address
        );
        self.smtp = Some(settings);
    }

    pub fn report_configs(&self) -> &[MonthlyReportConfig] {
        &self.report_configs
    }

    pub fn add_report_config(&mut self, new: NewReportConfig) -> Result<MonthlyReportConfig> {
        let group_id = self
            .find_group(&new.group_id)
            .map(|g| g.id.clone())
            .ok_or_else(|| UptimeError::Validation(format!("unknown group '{}'", new.group_id)))?;
        if new.recipients.is_empty() {
            return Err(UptimeError::Validation(
                "a monthly report needs at least one recipient".to_string(),
            ));
        }
        validate_recipients(&new.recipients)?;
        validate_send_day(new.send_day)?;

        let config = MonthlyReportConfig {
            id: Uuid::new_v4(),
            group_id,
            recipients: new.recipients,
            send_day: new.send_day,
            enabled: new.enabled.unwrap_or(true),
        };
        tracing::info!(
            "Monthly report for group '{}' scheduled on day {}",
            config.group_id,
            config.send_day
        );
        self.report_configs.push(config.clone());
        Ok(config)
    }

    pub fn update_report_config(
        &mut self,
        id: Uuid,
        update: ReportConfigUpdate,
    ) -> Result<MonthlyReportConfig> {
        if let Some(recipients) = &update.recipients {
            if recipients.is_empty() {
                return Err(UptimeError::Validation(
                    "a monthly report needs at least one recipient".to_string(),
                ));
            }
            validate_recipients(recipients)?;
        }
        if let Some(day) = update.send_day {
            validate_send_day(day)?;
        }
        let config = self
            .report_configs
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| UptimeError::NotFound(format!("monthly report config {}", id)))?;
        if let Some(recipients) = update.recipients {
            config.recipients = recipients;
        }
        if let Some(day) = update.send_day {
            config.send_day = day;
        }
        if let Some(enabled) = update.enabled {
            config.enabled = enabled;
        }
        Ok(config.clone())
    }

    pub fn remove_report_config(&mut self, id: Uuid) -> Result<()> {
        let before = self.report_configs.len();
        self.report_configs.retain(|c| c.id != id);
        if self.report_configs.len() == before {
            return Err(UptimeError::NotFound(format!("monthly report config {}", id)));
        }
        Ok(())
    }

    pub fn add_report_record(&mut self, record: MonthlyReportRecord) {
        self.report_history.push(record);
    }

    pub fn report_history(&self) -> &[MonthlyReportRecord] {
        &self.report_history
    }

    /// Whether a schedule's report for the period starting at `period_start`
    /// needs no further attempts: it was sent, or failed `max_failures` times
    pub fn report_settled(
        &self,
        config_id: Uuid,
        period_start: DateTime<Utc>,
        max_failures: u32,
    ) -> bool {
        let mut failures = 0;
        for record in self
            .report_history
            .iter()
            .filter(|r| r.config_id == Some(config_id) && r.period_start == period_start)
        {
            if record.outcome == AttemptOutcome::Sent {
                return true;
            }
            failures += 1;
        }
        failures >= max_failures
    }

    /// Replace groups and monitors declared in the config file, keeping
    /// whatever was created at runtime
    pub fn merge_catalog(&mut self, groups: Vec<Group>, monitors: Vec<Monitor>) {
        for group in groups {
            match self.groups.iter_mut().find(|g| g.id == group.id) {
                Some(existing) => *existing = group,
                None => self.groups.push(group),
            }
        }
        for monitor in monitors {
            match self.monitors.iter_mut().find(|m| m.id == monitor.id) {
                Some(existing) => *existing = monitor,
                None => self.monitors.push(monitor),
            }
        }
    }

    /// Drop probe results recorded before `cutoff`, returning how many were removed
    pub fn prune_probe_results(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for results in self.probes.values_mut() {
            let before = results.len();
            results.retain(|r| r.at >= cutoff);
            removed += before - results.len();
        }
        removed
    }
}

/// Thread-safe store handle
pub type StoreHandle = Arc<RwLock<Store>>;

pub fn new_store_handle(
    groups: Vec<Group>,
    monitors: Vec<Monitor>,
    smtp: Option<SmtpSettings>,
) -> StoreHandle {
    share(Store::new(groups, monitors, smtp))
}

pub fn share(store: Store) -> StoreHandle {
    Arc::new(RwLock::new(store))
}

/// Load SMTP settings saved by a previous run, if the file exists
pub fn load_smtp_settings(path: &Path) -> Result<Option<SmtpSettings>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

pub fn save_smtp_settings(path: &Path, settings: &SmtpSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Read a snapshot written by [`save_snapshot`], if there is one
pub fn load_snapshot(path: &Path) -> Result<Option<Store>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read(path)?;
    let store = serde_json::from_slice(&content).map_err(|e| {
        UptimeError::Config(format!("Failed to parse store snapshot {:?}: {}", path, e))
    })?;
    Ok(Some(store))
}

/// Write the store next to `path` and rename it into place
pub fn save_snapshot(path: &Path, store: &Store) -> Result<()> {
    write_atomic(path, &serde_json::to_vec(store)?)
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut tmp = PathBuf::from(path);
    tmp.set_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Snapshot the shared store; serialization happens under the read lock,
/// the file write after it is released
pub async fn persist(handle: &StoreHandle, path: &Path) -> Result<()> {
    let content = serde_json::to_vec(&*handle.read().await)?;
    write_atomic(path, &content)
}

/// Snapshot every `every` until cancelled, then once more
pub async fn persist_loop(
    handle: StoreHandle,
    path: PathBuf,
    every: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = cancel.cancelled() => break,
        }
        if let Err(e) = persist(&handle, &path).await {
            tracing::error!("Failed to write store snapshot {:?}: {}", path, e);
        }
    }
    match persist(&handle, &path).await {
        Ok(()) => tracing::info!("Store snapshot written to {:?}", path),
        Err(e) => tracing::error!("Failed to write store snapshot {:?}: {}", path, e),
    }
}
