//! BDD step definitions for public status page feature

use chrono::Utc;
use cucumber::{given, then, when};
use uptime::model::MonitorState;
use uptime::status::{OverallStatus, PublicStatus, StatusPresenter};
use uptime::UptimeError;

use crate::steps::health_steps::parse_status;
use crate::world::UptimeWorld;

#[given(expr = "the monitor {string} is {string}")]
async fn monitor_is(world: &mut UptimeWorld, monitor_id: String, status: String) {
    let state = MonitorState {
        status: parse_status(&status),
        last_transition_at: Some(Utc::now()),
        last_probe_at: Some(Utc::now()),
        last_response_time_ms: Some(150),
        ..MonitorState::unknown(&monitor_id)
    };
    world.store().write().await.put_state(state);
}

#[when(expr = "the status page for {string} is requested")]
async fn request_page(world: &mut UptimeWorld, group: String) {
    let presenter = StatusPresenter::new(world.store(), 10);
    let page = presenter.present(&group).await.expect("status page");
    world.status_pages.push(page);
}

#[when(expr = "the status page for {string} is requested {int} times")]
async fn request_page_repeatedly(world: &mut UptimeWorld, group: String, times: usize) {
    let presenter = StatusPresenter::new(world.store(), 10);
    for _ in 0..times {
        let page = presenter.present(&group).await.expect("status page");
        world.status_pages.push(page);
    }
}

#[then(expr = "the status page for {string} is not found")]
async fn page_not_found(world: &mut UptimeWorld, group: String) {
    let presenter = StatusPresenter::new(world.store(), 10);
    let err = presenter.present(&group).await.unwrap_err();
    assert!(matches!(err, UptimeError::NotFound(_)));
}

#[then(expr = "every service is shown as {string}")]
async fn every_service(world: &mut UptimeWorld, status: String) {
    let expected = match status.as_str() {
        "online" => PublicStatus::Online,
        "offline" => PublicStatus::Offline,
        other => panic!("Unknown public status: {}", other),
    };
    let page = world.status_pages.last().expect("no status page requested");
    assert!(!page.services.is_empty());
    assert!(page.services.iter().all(|s| s.status == expected));
}

#[then(expr = "the overall status is {string}")]
async fn overall_status(world: &mut UptimeWorld, status: String) {
    let expected = match status.as_str() {
        "operational" => OverallStatus::Operational,
        "outage" => OverallStatus::Outage,
        other => panic!("Unknown overall status: {}", other),
    };
    let page = world.status_pages.last().expect("no status page requested");
    assert_eq!(page.overall_status, expected);
}

#[then(expr = "the summary shows {int} online and {int} offline")]
async fn summary_counts(world: &mut UptimeWorld, online: usize, offline: usize) {
    let page = world.status_pages.last().expect("no status page requested");
    assert_eq!(page.summary.online, online);
    assert_eq!(page.summary.offline, offline);
    assert_eq!(page.summary.total, online + offline);
}

#[then("last_updated never decreases")]
async fn last_updated_monotonic(world: &mut UptimeWorld) {
    assert!(world.status_pages.len() > 1);
    for pair in world.status_pages.windows(2) {
        assert!(pair[1].last_updated >= pair[0].last_updated);
    }
}
