//! Probes that turn a monitor target into a `ProbeResult`
//!
//! A probe never returns an error: timeouts, refused connections and bad
//! status codes all become failed results carrying the reason.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpStream;

use crate::io::HttpClient;
use crate::model::{Monitor, ProbeKind, ProbeResult};

/// Trait for checking a monitor once
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult;
}

/// Probes HTTP monitors with a GET and TCP monitors with a bare connect
pub struct TargetProbe {
    http: Arc<dyn HttpClient>,
}

impl TargetProbe {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    async fn probe_http(&self, monitor: &Monitor) -> ProbeResult {
        let at = Utc::now();
        let started = Instant::now();
        match self.http.get(&monitor.target, monitor.timeout).await {
            Ok(response) if is_up_status(response.status) => {
                ProbeResult::success(&monitor.id, at, elapsed_ms(started))
            }
            Ok(response) => ProbeResult {
                response_time_ms: Some(elapsed_ms(started)),
                ..ProbeResult::failure(&monitor.id, at, format!("HTTP {}", response.status))
            },
            Err(e) => ProbeResult::failure(&monitor.id, at, e.to_string()),
        }
    }

    async fn probe_tcp(&self, monitor: &Monitor) -> ProbeResult {
        let at = Utc::now();
        let started = Instant::now();
        match tcp_connect(&monitor.target, monitor.timeout).await {
            Ok(()) => ProbeResult::success(&monitor.id, at, elapsed_ms(started)),
            Err(reason) => ProbeResult::failure(&monitor.id, at, reason),
        }
    }
}

#[async_trait]
impl Probe for TargetProbe {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult {
        let result = match monitor.kind {
            ProbeKind::Http => self.probe_http(monitor).await,
            ProbeKind::Tcp => self.probe_tcp(monitor).await,
        };
        tracing::debug!(
            "Probe '{}' -> success={} ({:?} ms)",
            monitor.name,
            result.success,
            result.response_time_ms
        );
        result
    }
}

/// 2xx and 3xx count as up
pub fn is_up_status(status: u16) -> bool {
    (200..400).contains(&status)
}

async fn tcp_connect(target: &str, timeout: Duration) -> Result<(), String> {
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(format!("TCP connect to {} failed: {}", target, e)),
        Err(_) => Err(format!(
            "TCP connect to {} timed out after {:?}",
            target, timeout
        )),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
