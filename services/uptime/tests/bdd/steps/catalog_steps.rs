//! BDD step definitions shared by features that need groups and monitors

use std::time::Duration;

use crate::world::{split_list, UptimeWorld};
use cucumber::given;
use uptime::model::{Monitor, ProbeKind};

pub fn monitor(id: &str, group_id: &str, interval: Duration) -> Monitor {
    Monitor {
        id: id.to_string(),
        name: id.to_string(),
        target: format!("https://{}.example.com", id),
        kind: ProbeKind::Http,
        group_id: group_id.to_string(),
        active: true,
        interval,
        timeout: Duration::from_secs(5),
        notifications_enabled: true,
    }
}

async fn add_monitor(world: &mut UptimeWorld, monitor: Monitor) {
    let store = world.store();
    store
        .write()
        .await
        .add_monitor(monitor)
        .expect("monitor should be added");
}

#[given(expr = "a group {string} with alert recipient {string}")]
async fn group_with_recipient(world: &mut UptimeWorld, name: String, recipient: String) {
    world.add_group(&name, Some(&recipient)).await;
}

#[given(expr = "a monitor {string} in group {string}")]
async fn monitor_in_group(world: &mut UptimeWorld, id: String, group: String) {
    let group_id = world.group_id(&group).await;
    add_monitor(world, monitor(&id, &group_id, Duration::from_secs(60))).await;
}

#[given(expr = "a muted monitor {string} in group {string}")]
async fn muted_monitor_in_group(world: &mut UptimeWorld, id: String, group: String) {
    let group_id = world.group_id(&group).await;
    let mut muted = monitor(&id, &group_id, Duration::from_secs(60));
    muted.notifications_enabled = false;
    add_monitor(world, muted).await;
}

#[given(expr = "monitors {string} in group {string} checked every {int} minute(s)")]
async fn monitors_in_group(world: &mut UptimeWorld, ids: String, group: String, minutes: u64) {
    let group_id = world.group_id(&group).await;
    for id in split_list(&ids) {
        add_monitor(
            world,
            monitor(&id, &group_id, Duration::from_secs(minutes * 60)),
        )
        .await;
    }
}
