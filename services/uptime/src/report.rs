//! Uptime reports computed from persisted probe results and incidents
//!
//! Uptime is time-weighted: every probe result inside the window stands for
//! one check interval of its monitor, and successful results stand for
//! online time. All arithmetic is integer so the same records always give
//! the same report.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Serialize, Serializer};

use crate::model::{GroupId, Incident, MonitorId};
use crate::store::{Store, StoreHandle};
use crate::{Result, UptimeError};

/// Half-open reporting window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(UptimeError::Validation(format!(
                "report window start {} must be before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days` days ending at `end`
    pub fn last_days(end: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: end - Duration::days(days.max(1)),
            end,
        }
    }

    /// The calendar month `year-month`, UTC
    pub fn month(year: i32, month: u32) -> Result<Self> {
        let start = month_start(year, month)?;
        let end = if month == 12 {
            month_start(year + 1, 1)?
        } else {
            month_start(year, month + 1)?
        };
        Ok(Self { start, end })
    }

    /// The calendar month before the one containing `now`
    pub fn previous_month(now: DateTime<Utc>) -> Result<Self> {
        let (year, month) = match now.month() {
            1 => (now.year() - 1, 12),
            m => (now.year(), m - 1),
        };
        Self::month(year, month)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

fn month_start(year: i32, month: u32) -> Result<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| UptimeError::Validation(format!("invalid month {}-{:02}", year, month)))
}

/// A percentage held in hundredths, so `99.40%` is `Percent(9940)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Percent(pub u32);

impl Percent {
    pub const FULL: Percent = Percent(10_000);

    /// `part / whole` rounded half-up to two decimals
    pub fn ratio(part: u128, whole: u128) -> Self {
        if whole == 0 {
            return Self::FULL;
        }
        let hundredths = (part * 20_000 + whole) / (whole * 2);
        Percent(u32::try_from(hundredths).unwrap_or(10_000).min(10_000))
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

/// Availability label for an uptime figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl AvailabilityTier {
    pub fn for_uptime(uptime: Percent) -> Self {
        match uptime.0 {
            9990.. => AvailabilityTier::Excellent,
            9900.. => AvailabilityTier::Good,
            9500.. => AvailabilityTier::Fair,
            _ => AvailabilityTier::Poor,
        }
    }
}

impl fmt::Display for AvailabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityTier::Excellent => write!(f, "Excellent"),
            AvailabilityTier::Good => write!(f, "Good"),
            AvailabilityTier::Fair => write!(f, "Fair"),
            AvailabilityTier::Poor => write!(f, "Poor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentSummary {
    pub id: String,
    pub monitor_id: MonitorId,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Whole minutes, absent while the incident is open
    pub duration_minutes: Option<i64>,
}

impl From<&Incident> for IncidentSummary {
    fn from(incident: &Incident) -> Self {
        Self {
            id: incident.id.to_string(),
            monitor_id: incident.monitor_id.clone(),
            opened_at: incident.opened_at,
            closed_at: incident.closed_at,
            duration_minutes: incident
                .closed_at
                .map(|closed| (closed - incident.opened_at).num_minutes()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    pub monitor_id: MonitorId,
    pub name: String,
    pub target: String,
    pub uptime_pct: Percent,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub avg_response_ms: u64,
    pub incidents: Vec<IncidentSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub group_id: GroupId,
    pub group_name: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub uptime_pct: Percent,
    pub avg_response_ms: u64,
    pub incident_count: u64,
    pub total_checks: u64,
    pub tier: AvailabilityTier,
    pub monitors: Vec<MonitorReport>,
}

/// Totals kept while walking probe results
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    checks: u64,
    successes: u64,
    monitored_ms: u128,
    online_ms: u128,
    response_sum: u128,
    responses: u64,
}

impl Tally {
    fn add(&mut self, other: Tally) {
        self.checks += other.checks;
        self.successes += other.successes;
        self.monitored_ms += other.monitored_ms;
        self.online_ms += other.online_ms;
        self.response_sum += other.response_sum;
        self.responses += other.responses;
    }

    fn uptime(&self) -> Percent {
        Percent::ratio(self.online_ms, self.monitored_ms)
    }

    fn avg_response_ms(&self) -> u64 {
        if self.responses == 0 {
            return 0;
        }
        let n = u128::from(self.responses);
        u64::try_from((self.response_sum * 2 + n) / (n * 2)).unwrap_or(u64::MAX)
    }
}

/// Build the report for a group, looked up by id or slug
pub fn summarize(store: &Store, group_ref: &str, window: &ReportWindow) -> Result<ReportSummary> {
    let group = store
        .find_group(group_ref)
        .ok_or_else(|| UptimeError::NotFound(format!("group '{}'", group_ref)))?;

    let mut total = Tally::default();
    let mut incident_count = 0u64;
    let mut monitors = Vec::new();

    for monitor in store.monitors_in_group(&group.id) {
        let interval_ms = monitor.interval.as_millis().max(1);
        let mut tally = Tally::default();
        for result in store.probe_results(&monitor.id, window.start, window.end) {
            tally.checks += 1;
            tally.monitored_ms += interval_ms;
            if result.success {
                tally.successes += 1;
                tally.online_ms += interval_ms;
            }
            if let Some(ms) = result.response_time_ms.filter(|ms| *ms > 0) {
                tally.response_sum += u128::from(ms);
                tally.responses += 1;
            }
        }

        let incidents: Vec<IncidentSummary> = store
            .incidents_for(&monitor.id)
            .into_iter()
            .filter(|i| window.contains(i.opened_at))
            .map(IncidentSummary::from)
            .collect();
        incident_count += incidents.len() as u64;

        monitors.push(MonitorReport {
            monitor_id: monitor.id.clone(),
            name: monitor.name.clone(),
            target: monitor.target.clone(),
            uptime_pct: tally.uptime(),
            total_checks: tally.checks,
            successful_checks: tally.successes,
            failed_checks: tally.checks - tally.successes,
            avg_response_ms: tally.avg_response_ms(),
            incidents,
        });
        total.add(tally);
    }

    let uptime_pct = total.uptime();
    Ok(ReportSummary {
        group_id: group.id.clone(),
        group_name: group.name.clone(),
        window_start: window.start,
        window_end: window.end,
        uptime_pct,
        avg_response_ms: total.avg_response_ms(),
        incident_count,
        total_checks: total.checks,
        tier: AvailabilityTier::for_uptime(uptime_pct),
        monitors,
    })
}

/// Computes reports from a snapshot of the store
#[derive(Clone)]
pub struct ReportAggregator {
    store: StoreHandle,
}

impl ReportAggregator {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub async fn aggregate(&self, group_ref: &str, window: &ReportWindow) -> Result<ReportSummary> {
        let store = self.store.read().await;
        let summary = summarize(&store, group_ref, window)?;
        tracing::debug!(
            "Report for '{}': {}% over {} checks, {} incidents",
            summary.group_name,
            summary.uptime_pct,
            summary.total_checks,
            summary.incident_count
        );
        Ok(summary)
    }
}
