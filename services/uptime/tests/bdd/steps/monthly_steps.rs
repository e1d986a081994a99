//! BDD step definitions for monthly report feature

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cucumber::{given, then, when};
use uptime::config::ReportsConfig;
use uptime::monthly::MonthlyReporter;
use uptime::smtp::Mailer;
use uptime::store::NewReportConfig;

use crate::world::{split_list, UptimeWorld};

fn reporter(world: &mut UptimeWorld) -> MonthlyReporter {
    let mailer: Arc<dyn Mailer> = world.mailer.clone().expect("no mail server configured");
    MonthlyReporter::new(
        world.store(),
        mailer,
        ReportsConfig::default(),
        world.max_attempts.unwrap_or(3),
    )
}

#[given(expr = "a monthly report for {string} to {string} on day {int}")]
async fn monthly_report(world: &mut UptimeWorld, group: String, to: String, send_day: u32) {
    let store = world.store();
    store
        .write()
        .await
        .add_report_config(NewReportConfig {
            group_id: group,
            recipients: vec![to],
            send_day,
            enabled: None,
        })
        .expect("schedule should be accepted");
}

#[when(expr = "monthly reports are checked at {string}")]
async fn checked_at(world: &mut UptimeWorld, at: String) {
    let now: DateTime<Utc> = at.parse().expect("timestamp must be RFC 3339");
    reporter(world).send_due(now).await.expect("check should run");
}

#[then(expr = "the {string} report was mailed to {string} with the PDF for {string}")]
async fn report_mailed(world: &mut UptimeWorld, month: String, to: String, period: String) {
    let sent = world.mailer.as_ref().expect("no mail server").sent();
    assert_eq!(sent.len(), 1, "expected one monthly report");
    let email = &sent[0];
    assert!(email.subject.ends_with(&month), "subject was {}", email.subject);
    assert_eq!(email.to, vec![to]);
    let pdf = &email.attachments[0];
    assert!(pdf.filename.ends_with(&format!("-{}.pdf", period)));
    assert_eq!(pdf.content_type, "application/pdf");
    assert!(pdf.data.starts_with(b"%PDF-"));
}

#[then("no monthly report was mailed")]
async fn nothing_mailed(world: &mut UptimeWorld) {
    let sent = world.mailer.as_ref().expect("no mail server").sent();
    assert!(sent.is_empty());
    assert!(world.store().read().await.report_history().is_empty());
}

#[then(expr = "the monthly report history is {string}")]
async fn history_is(world: &mut UptimeWorld, outcomes: String) {
    let store = world.store();
    let store = store.read().await;
    let actual: Vec<String> = store
        .report_history()
        .iter()
        .map(|r| r.outcome.to_string())
        .collect();
    assert_eq!(actual, split_list(&outcomes));
}
