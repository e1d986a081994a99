//! BDD step definitions for uptime report feature

use chrono::{DateTime, Utc};
use cucumber::{given, then, when};
use uptime::config::EngineConfig;
use uptime::health::HealthStateMachine;
use uptime::model::ProbeResult;
use uptime::pdf::{render_pdf, render_text};
use uptime::report::{ReportAggregator, ReportWindow};

use crate::world::UptimeWorld;

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .unwrap_or_else(|e| panic!("bad timestamp {}: {}", s, e))
        .with_timezone(&Utc)
}

fn window(end: &str, days: i64) -> ReportWindow {
    ReportWindow::last_days(parse_time(end), days)
}

#[given(expr = "{string} had an outage of {int} probes starting {string}")]
async fn outage(world: &mut UptimeWorld, monitor_id: String, probes: u32, start: String) {
    world.outages.push((monitor_id, parse_time(&start), probes));
}

#[given(expr = "{int} days of probes for every monitor in {string} ending {string}")]
async fn probe_history(world: &mut UptimeWorld, days: i64, group: String, end: String) {
    let group_id = world.group_id(&group).await;
    let window = window(&end, days);
    let threshold = EngineConfig::default().debounce_threshold;
    let outages = world.outages.clone();

    let store = world.store();
    let mut store = store.write().await;
    let monitors: Vec<_> = store
        .monitors_in_group(&group_id)
        .into_iter()
        .cloned()
        .collect();

    for monitor in monitors {
        let interval = chrono::Duration::from_std(monitor.interval).unwrap();
        let mut machine = HealthStateMachine::new(&monitor.id, threshold);
        let mut at = window.start;
        while at < window.end {
            let failing = outages.iter().any(|(id, start, probes)| {
                *id == monitor.id && at >= *start && at < *start + interval * *probes as i32
            });
            let result = if failing {
                ProbeResult::failure(&monitor.id, at, "HTTP 503")
            } else {
                ProbeResult::success(&monitor.id, at, 200)
            };
            let error = result.error.clone();
            let transition = machine.observe(&result);
            store.record_probe(result);
            match transition {
                Some(t) => {
                    store.record_transition(&monitor.id, &t, machine.state().clone(), error);
                }
                None => store.put_state(machine.state().clone()),
            }
            at += interval;
        }
    }
}

#[when(expr = "the report for {string} covers the {int} days ending {string}")]
async fn compute_report(world: &mut UptimeWorld, group: String, days: i64, end: String) {
    let reports = ReportAggregator::new(world.store());
    let summary = reports
        .aggregate(&group, &window(&end, days))
        .await
        .expect("report should be computed");
    world.report = Some(summary);
}

#[then(expr = "the uptime is below {int}")]
async fn uptime_below(world: &mut UptimeWorld, limit: u32) {
    let report = world.report.as_ref().expect("no report computed");
    assert!(report.uptime_pct.as_f64() < f64::from(limit));
}

#[then(expr = "the uptime is {string}")]
async fn uptime_is(world: &mut UptimeWorld, expected: String) {
    let report = world.report.as_ref().expect("no report computed");
    assert_eq!(report.uptime_pct.to_string(), expected);
}

#[then(expr = "the uptime of {string} is {string}")]
async fn monitor_uptime_is(world: &mut UptimeWorld, monitor_id: String, expected: String) {
    let report = world.report.as_ref().expect("no report computed");
    let monitor = report
        .monitors
        .iter()
        .find(|m| m.monitor_id == monitor_id)
        .unwrap_or_else(|| panic!("{} missing from report", monitor_id));
    assert_eq!(monitor.uptime_pct.to_string(), expected);
}

#[then(expr = "the incident count is {int}")]
async fn incident_count(world: &mut UptimeWorld, count: u64) {
    let report = world.report.as_ref().expect("no report computed");
    assert_eq!(report.incident_count, count);
}

#[then(expr = "the report counts {int} checks")]
async fn total_checks(world: &mut UptimeWorld, count: u64) {
    let report = world.report.as_ref().expect("no report computed");
    assert_eq!(report.total_checks, count);
}

#[then("the report is identical when computed again")]
async fn report_is_deterministic(world: &mut UptimeWorld) {
    let store = world.store();
    let report = world.report.as_ref().expect("no report computed");
    let window = ReportWindow::new(report.window_start, report.window_end).unwrap();
    let again = ReportAggregator::new(store)
        .aggregate(&report.group_id, &window)
        .await
        .unwrap();
    assert_eq!(report, &again);
}

#[then(expr = "the text export contains {string}")]
async fn text_export_contains(world: &mut UptimeWorld, expected: String) {
    let report = world.report.as_ref().expect("no report computed");
    let text = render_text(report);
    assert!(text.contains(&expected), "{:?} not in:\n{}", expected, text);
}

#[then("the PDF export is a PDF document")]
async fn pdf_export(world: &mut UptimeWorld) {
    let report = world.report.as_ref().expect("no report computed");
    let pdf = render_pdf(report);
    assert!(pdf.starts_with(b"%PDF-"));
    assert!(pdf.ends_with(b"%%EOF\n"));
}
