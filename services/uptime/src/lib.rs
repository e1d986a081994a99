//! Uptime - Website monitoring, alerting and reporting service
//!
//! Probes HTTP and TCP targets, debounces results into Online/Offline
//! state, emails alerts on transitions and monthly reports, and serves
//! reports and public status pages over an authenticated JSON API.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod gate;
pub mod health;
pub mod io;
pub mod model;
pub mod monthly;
pub mod pdf;
pub mod probe;
pub mod report;
pub mod smtp;
pub mod status;
pub mod store;

pub use config::{load_config, Config};
pub use error::{Result, UptimeError};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::dispatcher::NotificationDispatcher;
use crate::engine::Engine;
use crate::gate::{Gate, TokenValidator};
use crate::io::{HttpClient, ReqwestHttpClient};
use crate::monthly::MonthlyReporter;
use crate::probe::TargetProbe;
use crate::report::ReportAggregator;
use crate::smtp::{Mailer, SmtpMailer};
use crate::status::StatusPresenter;
use crate::store::Store;

/// How often idle rate-limit entries are dropped
const LIMITER_SWEEP: Duration = Duration::from_secs(60);

/// Sign a bearer token for `subject` with the configured secret and lifetime
pub fn issue_token(config: &Config, subject: &str) -> Result<String> {
    if config.server.token_secret.is_empty() {
        return Err(UptimeError::Config(format!(
            "no token secret configured; set server.token_secret or {}",
            config::TOKEN_SECRET_ENV
        )));
    }
    TokenValidator::new(&config.server.token_secret).issue(subject, config.server.token_ttl)
}

/// Run the uptime service with the given configuration
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;
    let cancel = CancellationToken::new();

    let store = store::share(initial_store(&config)?);

    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::default());
    let probe = Arc::new(TargetProbe::new(http));
    let mut mailer = SmtpMailer::new(config.notifications.smtp_timeout);
    if let Some(ca_file) = &config.notifications.smtp_ca_file {
        mailer = mailer.with_tls_config(smtp::tls_config(Some(ca_file))?);
    }
    let mailer: Arc<dyn Mailer> = Arc::new(mailer);
    let dispatcher =
        NotificationDispatcher::new(store.clone(), mailer.clone(), config.notifications.clone());
    let monthly = MonthlyReporter::new(
        store.clone(),
        mailer,
        config.reports.clone(),
        config.notifications.max_attempts,
    );
    let engine = Engine::new(
        store.clone(),
        probe,
        dispatcher.clone(),
        config.engine.clone(),
        cancel.clone(),
    )
    .with_reports(monthly.clone());

    let gate = Gate::from_config(&config.server);
    let app = AppState {
        store: store.clone(),
        dispatcher,
        reports: ReportAggregator::new(store.clone()),
        monthly,
        status: StatusPresenter::new(store.clone(), config.status.recent_incidents),
        engine: Some(engine.clone()),
        monitor_defaults: config.engine.clone(),
        smtp_settings_file: config.notifications.smtp_settings_file.clone(),
    };
    let router = api::build_router(app, gate.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        UptimeError::Config(format!("Failed to bind API to port {}: {}", addr.port(), e))
    })?;
    tracing::info!("API listening on http://{}", addr);

    // Setup shutdown handler
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
        cancel_for_signal.cancel();
    });

    let limiter = gate.limiter.clone();
    let cancel_for_sweep = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(LIMITER_SWEEP) => limiter.sweep(Instant::now()),
                _ = cancel_for_sweep.cancelled() => break,
            }
        }
    });

    let snapshots = config.storage.snapshot_path().map(|path| {
        tokio::spawn(store::persist_loop(
            store.clone(),
            path,
            config.storage.snapshot_interval,
            cancel.clone(),
        ))
    });

    let cancel_for_server = cancel.clone();
    let server = tokio::spawn(cancel_when_done(
        async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel_for_server.cancelled().await;
            })
            .await
        },
        cancel.clone(),
    ));

    tracing::info!("Uptime engine started");

    // Run the engine (blocks until cancelled)
    engine.run().await;

    let served = match server.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("API server task failed: {}", e);
            Ok(())
        }
    };
    // The final snapshot is written even when the server failed
    if let Some(snapshots) = snapshots {
        if let Err(e) = snapshots.await {
            tracing::error!("Snapshot task failed: {}", e);
        }
    }
    served?;
    tracing::info!("Uptime engine stopped");

    Ok(())
}

/// The snapshot from the last run, if any, with the config file's catalog
/// merged in. SMTP settings come from the settings file, then the snapshot,
/// then the config file.
fn initial_store(config: &Config) -> Result<Store> {
    let mut store = match config.storage.snapshot_path() {
        Some(path) => match store::load_snapshot(&path)? {
            Some(saved) => {
                tracing::info!("Loaded store snapshot from {:?}", path);
                saved
            }
            None => Store::default(),
        },
        None => Store::default(),
    };

    let monitors = config
        .monitors
        .iter()
        .map(|m| m.to_monitor(&config.engine))
        .collect();
    store.merge_catalog(config.groups.clone(), monitors);

    let saved_smtp = match &config.notifications.smtp_settings_file {
        Some(path) => store::load_smtp_settings(path)?,
        None => None,
    };
    if let Some(saved) = saved_smtp {
        tracing::info!("Loaded SMTP settings from settings file");
        store.set_smtp_settings(saved);
    } else if store.smtp_settings().is_none() {
        if let Some(initial) = config.smtp.clone() {
            store.set_smtp_settings(initial);
        }
    }
    Ok(store)
}

/// Run `task`, then cancel `cancel` however it ended
async fn cancel_when_done<F: std::future::Future>(task: F, cancel: CancellationToken) -> F::Output {
    let output = task.await;
    if !cancel.is_cancelled() {
        tracing::warn!("API server stopped; shutting down the engine");
        cancel.cancel();
    }
    output
}
