//! Monthly report emails
//!
//! Each enabled schedule mails its group's report for the previous calendar
//! month, PDF attached, once the send day and hour have come. A period is
//! done once delivered or after `max_attempts` failed sends; failed sends
//! are retried on later checks until then.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ReportsConfig;
use crate::model::{AttemptOutcome, MonthlyReportConfig, MonthlyReportRecord};
use crate::pdf;
use crate::report::{ReportAggregator, ReportWindow};
use crate::smtp::{validate_address, Attachment, Email, Mailer};
use crate::store::StoreHandle;
use crate::{Result, UptimeError};

#[derive(Clone)]
pub struct MonthlyReporter {
    store: StoreHandle,
    reports: ReportAggregator,
    mailer: Arc<dyn Mailer>,
    config: ReportsConfig,
    max_attempts: u32,
}

impl MonthlyReporter {
    pub fn new(
        store: StoreHandle,
        mailer: Arc<dyn Mailer>,
        config: ReportsConfig,
        max_attempts: u32,
    ) -> Self {
        Self {
            reports: ReportAggregator::new(store.clone()),
            store,
            mailer,
            config,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Mail the report of `group_ref` for `window` and record the outcome
    pub async fn send(
        &self,
        group_ref: &str,
        window: ReportWindow,
        to: Vec<String>,
        config_id: Option<Uuid>,
    ) -> Result<MonthlyReportRecord> {
        if to.is_empty() {
            return Err(UptimeError::Validation(
                "a monthly report needs at least one recipient".to_string(),
            ));
        }
        for recipient in &to {
            validate_address(recipient)?;
        }
        let summary = self.reports.aggregate(group_ref, &window).await?;

        let month = window.start.format("%Y-%m").to_string();
        let email = Email {
            to: to.clone(),
            subject: format!(
                "[Uptime] Monthly report for {}: {}",
                summary.group_name,
                window.start.format("%B %Y")
            ),
            body: pdf::render_text(&summary),
            attachments: vec![Attachment {
                filename: format!("uptime-report-{}-{}.pdf", summary.group_id, month),
                content_type: "application/pdf".to_string(),
                data: pdf::render_pdf(&summary),
            }],
        };

        let settings = self.store.read().await.smtp_settings().cloned();
        let result = match settings {
            Some(settings) => self.mailer.send(&settings, &email).await,
            None => Err(UptimeError::Delivery(
                "SMTP settings are not configured".to_string(),
            )),
        };

        let record = MonthlyReportRecord {
            id: Uuid::new_v4(),
            config_id,
            group_id: summary.group_id.clone(),
            period_start: window.start,
            period_end: window.end,
            recipients: to,
            at: Utc::now(),
            outcome: if result.is_ok() {
                AttemptOutcome::Sent
            } else {
                AttemptOutcome::Failed
            },
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        self.store.write().await.add_report_record(record.clone());

        match result {
            Ok(()) => {
                tracing::info!(
                    "Monthly report {} for '{}' sent to {} recipient(s)",
                    month,
                    summary.group_name,
                    record.recipients.len()
                );
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(
                    "Monthly report {} for '{}' failed: {}",
                    month,
                    summary.group_name,
                    e
                );
                Err(e)
            }
        }
    }

    /// Send every schedule that is due at `now` and not yet settled
    pub async fn send_due(&self, now: DateTime<Utc>) -> Result<Vec<MonthlyReportRecord>> {
        let window = ReportWindow::previous_month(now)?;
        let due: Vec<MonthlyReportConfig> = {
            let store = self.store.read().await;
            store
                .report_configs()
                .iter()
                .filter(|c| c.enabled && is_due(c, now, self.config.send_hour))
                .filter(|c| !store.report_settled(c.id, window.start, self.max_attempts))
                .cloned()
                .collect()
        };

        let mut sent = Vec::new();
        for config in due {
            if let Ok(record) = self
                .send(&config.group_id, window, config.recipients, Some(config.id))
                .await
            {
                sent.push(record);
            }
        }
        Ok(sent)
    }

    /// Check for due reports every `check_every` until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.send_due(Utc::now()).await {
                tracing::error!("Monthly report check failed: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.check_every) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }
}

/// Due from `send_hour` on the send day through the rest of the month
fn is_due(config: &MonthlyReportConfig, now: DateTime<Utc>, send_hour: u32) -> bool {
    now.day() > config.send_day || (now.day() == config.send_day && now.hour() >= send_hour)
}
