//! BDD step definitions for alert delivery feature

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cucumber::{given, then, when};
use tokio_util::sync::CancellationToken;
use uptime::config::{BackoffConfig, EngineConfig, NotificationConfig};
use uptime::dispatcher::{Delivery, NotificationDispatcher};
use uptime::engine::Engine;
use uptime::health::HealthStateMachine;
use uptime::model::{Monitor, ProbeResult, SmtpSettings};
use uptime::probe::Probe;
use uptime::smtp::{Mailer, SmtpMailer};

use crate::steps::health_steps::{parse_status, probe_results};
use crate::world::{split_list, RecordingMailer, UptimeWorld};

/// Results are fed to the engine directly, so this is never polled
struct IdleProbe;

#[async_trait]
impl Probe for IdleProbe {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult {
        ProbeResult::success(&monitor.id, Utc::now(), 1)
    }
}

async fn use_smtp(world: &mut UptimeWorld, host: &str, port: u16) {
    let settings = SmtpSettings {
        host: host.to_string(),
        port,
        from_address: "alerts@example.com".to_string(),
        ..SmtpSettings::default()
    };
    world.store().write().await.set_smtp_settings(settings);
}

fn engine(world: &mut UptimeWorld) -> Engine {
    let store = world.store();
    let mailer: Arc<dyn Mailer> = match &world.mailer {
        Some(mailer) => mailer.clone(),
        None => Arc::new(SmtpMailer::new(Duration::from_millis(500))),
    };
    let notifications = NotificationConfig {
        max_attempts: world.max_attempts.unwrap_or(3),
        backoff: BackoffConfig::Fixed {
            delay: Duration::from_millis(5),
        },
        ..NotificationConfig::default()
    };
    let dispatcher = NotificationDispatcher::new(store.clone(), mailer, notifications);
    Engine::new(
        store,
        Arc::new(IdleProbe),
        dispatcher,
        EngineConfig::default(),
        CancellationToken::new(),
    )
}

#[given("SMTP settings pointing at an unreachable host")]
async fn unreachable_smtp(world: &mut UptimeWorld) {
    // Nothing listens on the discard port locally, so connects are refused
    use_smtp(world, "127.0.0.1", 9).await;
}

#[given(expr = "a mail server that rejects the first {int} message(s)")]
async fn flaky_mail_server(world: &mut UptimeWorld, rejections: u32) {
    use_smtp(world, "mail.example.com", 25).await;
    world.mailer = Some(Arc::new(RecordingMailer::rejecting(rejections)));
}

#[given(expr = "alerts allow {int} attempt(s)")]
async fn alerts_allow(world: &mut UptimeWorld, attempts: u32) {
    world.max_attempts = Some(attempts);
}

#[when(expr = "the engine ingests probe results {string} for {string}")]
async fn engine_ingests(world: &mut UptimeWorld, list: String, monitor_id: String) {
    let engine = engine(world);
    let mut machine = match world.machines.remove(&monitor_id) {
        Some(machine) => machine,
        None => {
            let state = world.store().read().await.state(&monitor_id);
            HealthStateMachine::resume(state, EngineConfig::default().debounce_threshold)
        }
    };

    let results = probe_results(&monitor_id, &list, world.probes_seen);
    world.probes_seen += results.len();
    for result in results {
        if let Some(dispatched) = engine.ingest(&mut machine, result).await {
            let delivery = tokio::time::timeout(Duration::from_secs(10), dispatched.delivery)
                .await
                .expect("delivery should finish")
                .expect("delivery task should not panic");
            world.events.push(dispatched.event);
            world.deliveries.push(delivery);
        }
    }
    world.machines.insert(monitor_id, machine);
}

#[then(expr = "the status of {string} is {string}")]
async fn status_of(world: &mut UptimeWorld, monitor_id: String, status: String) {
    let state = world.store().read().await.state(&monitor_id);
    assert_eq!(state.status, parse_status(&status));
}

#[then(expr = "{string} has {int} open incident(s)")]
async fn open_incidents(world: &mut UptimeWorld, monitor_id: String, count: usize) {
    let store = world.store();
    let store = store.read().await;
    let open = store
        .incidents_for(&monitor_id)
        .iter()
        .filter(|i| i.is_open())
        .count();
    assert_eq!(open, count);
}

#[then(expr = "{string} has {int} incident(s) in total")]
async fn total_incidents(world: &mut UptimeWorld, monitor_id: String, count: usize) {
    let store = world.store();
    let store = store.read().await;
    assert_eq!(store.incidents_for(&monitor_id).len(), count);
}

#[then(regex = r"^exactly (\d+) attempt series (?:was|were) logged$")]
async fn attempt_series(world: &mut UptimeWorld, count: usize) {
    let store = world.store();
    let store = store.read().await;
    let series: HashSet<_> = store.attempts().iter().map(|a| a.transition_id).collect();
    assert_eq!(series.len(), count);
}

#[then(expr = "the attempt outcomes are {string}")]
async fn attempt_outcomes(world: &mut UptimeWorld, outcomes: String) {
    let store = world.store();
    let store = store.read().await;
    let logged: Vec<String> = store
        .attempts()
        .iter()
        .map(|a| a.outcome.to_string())
        .collect();
    assert_eq!(logged, split_list(&outcomes));
    for (i, attempt) in store.attempts().iter().enumerate() {
        assert_eq!(attempt.attempt, i as u32 + 1);
    }
}

#[then("no attempts were logged")]
async fn no_attempts(world: &mut UptimeWorld) {
    assert!(world.store().read().await.attempts().is_empty());
}

#[then(expr = "an alert with subject {string} was sent to {string}")]
async fn alert_sent(world: &mut UptimeWorld, subject: String, recipient: String) {
    let mailer = world.mailer.as_ref().expect("no recording mail server");
    let sent = mailer.sent();
    assert!(
        sent.iter()
            .any(|e| e.subject == subject && e.to.contains(&recipient)),
        "no alert '{}' to {} in {:?}",
        subject,
        recipient,
        sent
    );
}

#[then(regex = r"^the last delivery (sent|failed) after (\d+) attempts?$")]
async fn last_delivery(world: &mut UptimeWorld, outcome: String, attempts: u32) {
    let expected = match outcome.as_str() {
        "sent" => Delivery::Sent { attempts },
        _ => Delivery::Failed { attempts },
    };
    assert_eq!(world.deliveries.last(), Some(&expected));
}

#[then(expr = "the engine emitted transitions to {string}")]
async fn emitted_transitions(world: &mut UptimeWorld, statuses: String) {
    let emitted: Vec<_> = world.events.iter().map(|e| e.to).collect();
    let expected: Vec<_> = split_list(&statuses)
        .iter()
        .map(|s| parse_status(s))
        .collect();
    assert_eq!(emitted, expected);
}
