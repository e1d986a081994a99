//! BDD step definitions for debounced health state

use chrono::{Duration, TimeZone, Utc};
use cucumber::{given, then, when};
use uptime::health::HealthStateMachine;
use uptime::model::{HealthStatus, ProbeResult};

use crate::world::{split_list, UptimeWorld};

pub fn parse_status(s: &str) -> HealthStatus {
    match s {
        "online" => HealthStatus::Online,
        "offline" => HealthStatus::Offline,
        "unknown" => HealthStatus::Unknown,
        other => panic!("Unknown health status: {}", other),
    }
}

/// Turn "ok"/"fail" words into probe results one minute apart
pub fn probe_results(monitor_id: &str, list: &str, offset: usize) -> Vec<ProbeResult> {
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    split_list(list)
        .iter()
        .enumerate()
        .map(|(i, word)| {
            let at = base + Duration::minutes((offset + i) as i64);
            match word.as_str() {
                "ok" => ProbeResult::success(monitor_id, at, 120),
                "fail" => ProbeResult::failure(monitor_id, at, "connection refused"),
                other => panic!("Unknown probe outcome: {}", other),
            }
        })
        .collect()
}

#[given(expr = "a debounce threshold of {int}")]
async fn debounce_threshold(world: &mut UptimeWorld, threshold: u32) {
    world.machine = Some(HealthStateMachine::new("site", threshold));
}

#[when(expr = "the probe results {string} are observed")]
async fn observe_results(world: &mut UptimeWorld, list: String) {
    let results = probe_results("site", &list, world.probes_seen);
    world.probes_seen += results.len();
    let machine = world.machine.as_mut().expect("no state machine configured");
    for result in results {
        if let Some(transition) = machine.observe(&result) {
            world.machine_transitions.push(transition);
        }
    }
}

#[then(expr = "the status is {string}")]
async fn status_is(world: &mut UptimeWorld, status: String) {
    let machine = world.machine.as_ref().expect("no state machine configured");
    assert_eq!(machine.status(), parse_status(&status));
}

#[then(regex = r"^(\d+) transitions? (?:was|were) emitted$")]
async fn transitions_emitted(world: &mut UptimeWorld, count: usize) {
    assert_eq!(world.machine_transitions.len(), count);
}

#[then(expr = "the last transition went from {string} to {string}")]
async fn last_transition(world: &mut UptimeWorld, from: String, to: String) {
    let transition = world
        .machine_transitions
        .last()
        .expect("no transition was emitted");
    assert_eq!(transition.from, parse_status(&from));
    assert_eq!(transition.to, parse_status(&to));
}
