//! Alert delivery for state transitions
//!
//! `notify` hands the event to a spawned task and returns at once. Inside
//! that task attempts run one after another with the configured backoff, and
//! each attempt is appended to the store's attempt log.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::config::NotificationConfig;
use crate::model::{
    AttemptOutcome, Group, HealthStatus, Monitor, NotificationAttempt, TransitionEvent,
};
use crate::smtp::{validate_address, Email, Mailer};
use crate::store::StoreHandle;
use crate::{Result, UptimeError};

/// How an attempt series ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Notifications disabled, no recipients, or a transition that is not alerted on
    Skipped,
    Sent { attempts: u32 },
    Failed { attempts: u32 },
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: StoreHandle,
    mailer: Arc<dyn Mailer>,
    config: NotificationConfig,
}

impl NotificationDispatcher {
    pub fn new(store: StoreHandle, mailer: Arc<dyn Mailer>, config: NotificationConfig) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    /// Deliver in the background; failures only reach the log and the attempt log
    pub fn notify(&self, event: TransitionEvent) -> JoinHandle<Delivery> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.deliver(&event).await })
    }

    /// Run the attempt series for one transition
    pub async fn deliver(&self, event: &TransitionEvent) -> Delivery {
        let Some(email) = self.prepare(event).await else {
            return Delivery::Skipped;
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self.send_once(&email).await;
            let outcome = match &result {
                Ok(()) => AttemptOutcome::Sent,
                Err(_) if attempt < max_attempts => AttemptOutcome::Retrying,
                Err(_) => AttemptOutcome::Failed,
            };
            let error = result.err().map(|e| e.to_string());

            self.store.write().await.add_attempt(NotificationAttempt {
                transition_id: event.id,
                monitor_id: event.monitor_id.clone(),
                attempt,
                at: Utc::now(),
                outcome,
                error: error.clone(),
            });

            match outcome {
                AttemptOutcome::Sent => {
                    tracing::info!(
                        "Alert for '{}' ({} -> {}) sent on attempt {}",
                        event.monitor_id,
                        event.from,
                        event.to,
                        attempt
                    );
                    return Delivery::Sent { attempts: attempt };
                }
                AttemptOutcome::Retrying => {
                    let delay = self.config.backoff.delay_after(attempt);
                    tracing::warn!(
                        "Alert for '{}' attempt {}/{} failed: {}; retrying in {:?}",
                        event.monitor_id,
                        attempt,
                        max_attempts,
                        error.as_deref().unwrap_or_default(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                AttemptOutcome::Failed => {
                    tracing::error!(
                        "Alert for '{}' failed after {} attempts: {}",
                        event.monitor_id,
                        attempt,
                        error.as_deref().unwrap_or_default()
                    );
                    return Delivery::Failed { attempts: attempt };
                }
            }
        }
    }

    /// Send one message with the stored settings, no retries
    pub async fn send_test(&self, to: Vec<String>) -> Result<()> {
        let to = if to.is_empty() {
            self.config.recipients.clone()
        } else {
            to
        };
        if to.is_empty() {
            return Err(UptimeError::Validation(
                "no recipients given and none configured".to_string(),
            ));
        }
        for recipient in &to {
            validate_address(recipient)?;
        }
        let email = Email {
            to,
            subject: "[Uptime] SMTP test".to_string(),
            body: "This is a test message from the uptime monitor.".to_string(),
            ..Email::default()
        };
        self.send_once(&email).await
    }

    async fn send_once(&self, email: &Email) -> Result<()> {
        let settings = self.store.read().await.smtp_settings().cloned();
        match settings {
            Some(settings) => self.mailer.send(&settings, email).await,
            None => Err(UptimeError::Delivery(
                "SMTP settings are not configured".to_string(),
            )),
        }
    }

    /// Build the email, or `None` when this transition should not alert
    async fn prepare(&self, event: &TransitionEvent) -> Option<Email> {
        if event.from == HealthStatus::Unknown && event.to == HealthStatus::Online {
            tracing::debug!("'{}' came up for the first time; no alert", event.monitor_id);
            return None;
        }

        let store = self.store.read().await;
        let Some(monitor) = store.monitor(&event.monitor_id) else {
            tracing::warn!("Transition for unknown monitor '{}'", event.monitor_id);
            return None;
        };
        let group = store.group(&monitor.group_id);

        let group_enabled = group.map(|g| g.notifications_enabled).unwrap_or(true);
        if !monitor.notifications_enabled || !group_enabled {
            tracing::debug!("Notifications disabled for '{}'", monitor.name);
            return None;
        }

        let to = match group {
            Some(g) if !g.alert_recipients.is_empty() => g.alert_recipients.clone(),
            _ => self.config.recipients.clone(),
        };
        if to.is_empty() {
            tracing::debug!("No alert recipients for '{}'", monitor.name);
            return None;
        }

        let downtime = event
            .incident_id
            .and_then(|id| store.incident(id))
            .and_then(|i| i.closed_at.map(|closed| closed - i.opened_at));

        Some(render(monitor, group, event, downtime, to))
    }
}

fn render(
    monitor: &Monitor,
    group: Option<&Group>,
    event: &TransitionEvent,
    downtime: Option<chrono::Duration>,
    to: Vec<String>,
) -> Email {
    let subject = format!("[Uptime] {} is {}", monitor.name, event.to);

    let mut body = String::new();
    body.push_str(&format!("Monitor: {}\n", monitor.name));
    body.push_str(&format!("Target: {}\n", monitor.target));
    if let Some(group) = group {
        body.push_str(&format!("Group: {}\n", group.name));
    }
    body.push_str(&format!("Status: {} -> {}\n", event.from, event.to));
    body.push_str(&format!("At: {}\n", event.at.to_rfc3339()));
    if let Some(id) = event.incident_id {
        body.push_str(&format!("Incident: {}\n", id));
    }
    if let Some(error) = &event.error {
        body.push_str(&format!("Error: {}\n", error));
    }
    if let Some(downtime) = downtime {
        body.push_str(&format!("Downtime: {} min\n", downtime.num_minutes()));
    }

    Email {
        to,
        subject,
        body,
        ..Email::default()
    }
}
