//! BDD world for the uptime service

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use cucumber::World;
use uptime::dispatcher::Delivery;
use uptime::health::{HealthStateMachine, Transition};
use uptime::model::{Group, SmtpSettings, TransitionEvent};
use uptime::report::ReportSummary;
use uptime::smtp::{Email, Mailer};
use uptime::status::StatusPage;
use uptime::store::{new_store_handle, NewGroup, StoreHandle};
use uptime::{Result, UptimeError};

pub const TOKEN_SECRET: &str = "bdd-secret";

/// Mail server stand-in that refuses a number of messages before accepting
#[derive(Debug, Default)]
pub struct RecordingMailer {
    pub rejections_left: AtomicU32,
    pub sent: Mutex<Vec<Email>>,
}

impl RecordingMailer {
    pub fn rejecting(count: u32) -> Self {
        Self {
            rejections_left: AtomicU32::new(count),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, _settings: &SmtpSettings, email: &Email) -> Result<()> {
        let rejected = self
            .rejections_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(UptimeError::Smtp("451 try again later".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[derive(Debug, Default, World)]
pub struct UptimeWorld {
    pub store: Option<StoreHandle>,
    pub max_attempts: Option<u32>,
    pub mailer: Option<Arc<RecordingMailer>>,

    // Standalone debouncing
    pub probes_seen: usize,
    pub machine: Option<HealthStateMachine>,
    pub machine_transitions: Vec<Transition>,

    // Engine ingestion
    pub machines: HashMap<String, HealthStateMachine>,
    pub events: Vec<TransitionEvent>,
    pub deliveries: Vec<Delivery>,

    // Reports
    pub outages: Vec<(String, chrono::DateTime<chrono::Utc>, u32)>,
    pub report: Option<ReportSummary>,

    // Status pages
    pub status_pages: Vec<StatusPage>,

    // Access gate
    pub router: Option<Router>,
    pub responses: Vec<(u16, String)>,
}

impl UptimeWorld {
    pub fn store(&mut self) -> StoreHandle {
        self.store
            .get_or_insert_with(|| new_store_handle(Vec::new(), Vec::new(), None))
            .clone()
    }

    pub async fn add_group(&mut self, name: &str, recipient: Option<&str>) -> Group {
        let new = NewGroup {
            name: name.to_string(),
            slug: Some(name.to_string()),
            description: String::new(),
            alert_recipients: recipient.map(|r| vec![r.to_string()]).unwrap_or_default(),
        };
        let store = self.store();
        let mut store = store.write().await;
        store.create_group(new).expect("group should be created")
    }

    pub async fn group_id(&mut self, reference: &str) -> String {
        let store = self.store();
        let store = store.read().await;
        store
            .find_group(reference)
            .map(|g| g.id.clone())
            .unwrap_or_else(|| panic!("unknown group {}", reference))
    }

    pub fn last_response(&self) -> &(u16, String) {
        self.responses.last().expect("no request was sent")
    }
}

/// Parse a comma separated list such as "ok, fail, ok"
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
