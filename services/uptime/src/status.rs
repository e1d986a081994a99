//! Public, unauthenticated status page for a group

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::model::{HealthStatus, MonitorId};
use crate::store::{Store, StoreHandle};
use crate::{Result, UptimeError};

/// Status as shown to the public; `Unknown` is reported as offline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicStatus {
    Online,
    Offline,
}

impl From<HealthStatus> for PublicStatus {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Online => PublicStatus::Online,
            HealthStatus::Offline | HealthStatus::Unknown => PublicStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Operational,
    Outage,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub id: MonitorId,
    pub name: String,
    pub status: PublicStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicIncident {
    pub service: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPage {
    pub group: GroupInfo,
    pub services: Vec<ServiceStatus>,
    pub overall_status: OverallStatus,
    pub summary: StatusSummary,
    pub recent_incidents: Vec<PublicIncident>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StatusPresenter {
    store: StoreHandle,
    recent_incidents: usize,
    /// Highest `last_updated` handed out so far, in epoch milliseconds
    high_water_ms: Arc<AtomicI64>,
}

impl StatusPresenter {
    pub fn new(store: StoreHandle, recent_incidents: usize) -> Self {
        Self {
            store,
            recent_incidents,
            high_water_ms: Arc::new(AtomicI64::new(i64::MIN)),
        }
    }

    pub async fn present(&self, group_ref: &str) -> Result<StatusPage> {
        let store = self.store.read().await;
        let mut page = build_page(&store, group_ref, self.recent_incidents)?;
        page.last_updated = self.advance(page.last_updated);
        Ok(page)
    }

    /// Never return a timestamp older than one already returned
    fn advance(&self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let candidate_ms = candidate.timestamp_millis();
        let previous = self.high_water_ms.fetch_max(candidate_ms, Ordering::SeqCst);
        let ms = previous.max(candidate_ms);
        Utc.timestamp_millis_opt(ms).single().unwrap_or(candidate)
    }
}

fn build_page(store: &Store, group_ref: &str, recent_limit: usize) -> Result<StatusPage> {
    let group = store
        .find_group(group_ref)
        .ok_or_else(|| UptimeError::NotFound(format!("status page '{}'", group_ref)))?;

    let monitors: Vec<_> = store
        .monitors_in_group(&group.id)
        .into_iter()
        .filter(|m| m.active)
        .collect();

    let services: Vec<ServiceStatus> = monitors
        .iter()
        .map(|monitor| {
            let state = store.state(&monitor.id);
            ServiceStatus {
                id: monitor.id.clone(),
                name: monitor.name.clone(),
                status: state.status.into(),
                last_checked: state.last_probe_at,
                response_time_ms: state.last_response_time_ms,
            }
        })
        .collect();

    let online = services
        .iter()
        .filter(|s| s.status == PublicStatus::Online)
        .count();
    let summary = StatusSummary {
        total: services.len(),
        online,
        offline: services.len() - online,
    };
    let overall_status = if summary.offline == 0 {
        OverallStatus::Operational
    } else {
        OverallStatus::Outage
    };

    let mut incidents: Vec<PublicIncident> = monitors
        .iter()
        .flat_map(|monitor| {
            store
                .incidents_for(&monitor.id)
                .into_iter()
                .map(move |incident| PublicIncident {
                    service: monitor.name.clone(),
                    opened_at: incident.opened_at,
                    closed_at: incident.closed_at,
                })
        })
        .collect();
    incidents.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
    incidents.truncate(recent_limit);

    Ok(StatusPage {
        group: GroupInfo {
            id: group.id.clone(),
            name: group.name.clone(),
            description: group.description.clone(),
        },
        services,
        overall_status,
        summary,
        recent_incidents: incidents,
        last_updated: Utc::now(),
    })
}
