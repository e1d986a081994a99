//! HTTP API: public status pages plus the token-protected admin and report routes

use std::path::PathBuf;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::engine::Engine;
use crate::gate::{self, Gate};
use crate::model::{HealthStatus, Monitor, ProbeKind, SmtpSettings};
use crate::monthly::MonthlyReporter;
use crate::report::{ReportAggregator, ReportWindow};
use crate::status::StatusPresenter;
use crate::store::{self, NewGroup, NewReportConfig, ReportConfigUpdate, StoreHandle};
use crate::{pdf, Result, UptimeError};

/// Default report window when `from` is not given
const DEFAULT_REPORT_DAYS: i64 = 30;

/// Placeholder returned instead of a stored password
const REDACTED: &str = "********";

/// API application state
#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub dispatcher: NotificationDispatcher,
    pub reports: ReportAggregator,
    pub monthly: MonthlyReporter,
    pub status: StatusPresenter,
    /// Starts polling for monitors created at runtime; absent when the API runs alone
    pub engine: Option<Engine>,
    pub monitor_defaults: EngineConfig,
    pub smtp_settings_file: Option<PathBuf>,
}

/// Build the API router
///
/// `/api/health` is outside the gate. Everything else passes CORS and the
/// rate limit; all routes except the status page also need a bearer token.
pub fn build_router(state: AppState, gate: Gate) -> Router {
    let protected = Router::new()
        .route("/api/groups", get(list_groups).post(create_group))
        .route("/api/monitors", get(list_monitors).post(create_monitor))
        .route("/api/monitors/{id}/state", get(monitor_state))
        .route("/api/monitors/{id}/check", post(check_monitor))
        .route("/api/smtp/config", get(get_smtp).put(put_smtp))
        .route("/api/smtp/test", post(test_smtp))
        .route("/api/notifications", get(list_notifications))
        .route("/api/reports/{group}", get(report_json))
        .route("/api/reports/{group}/text", get(report_text))
        .route("/api/reports/{group}/pdf", get(report_pdf))
        .route(
            "/api/monthly-reports/configs",
            get(list_report_configs).post(create_report_config),
        )
        .route(
            "/api/monthly-reports/configs/{id}",
            put(update_report_config).delete(delete_report_config),
        )
        .route("/api/monthly-reports/history", get(report_history))
        .route("/api/monthly-reports/send", post(send_monthly_report))
        .route_layer(middleware::from_fn_with_state(
            gate.clone(),
            gate::auth_stage,
        ));

    let gated = Router::new()
        .route("/api/status/{group}", get(status_page))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(
                    gate.clone(),
                    gate::cors_stage,
                ))
                .layer(gate.origins.cors_layer())
                .layer(middleware::from_fn_with_state(
                    gate.clone(),
                    gate::rate_limit_stage,
                )),
        );

    Router::new()
        .route("/api/health", get(health_handler))
        .merge(gated)
        .with_state(state)
}

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| UptimeError::Validation(e.body_text()))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status_page(
    State(app): State<AppState>,
    Path(group): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(app.status.present(&group).await?))
}

async fn list_groups(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.store.read().await.groups().to_vec())
}

async fn create_group(
    State(app): State<AppState>,
    payload: std::result::Result<Json<NewGroup>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let new = json_body(payload)?;
    let group = app.store.write().await.create_group(new)?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// A monitor with its current health
#[derive(Debug, Serialize)]
struct MonitorView {
    #[serde(flatten)]
    monitor: Monitor,
    status: HealthStatus,
}

async fn list_monitors(State(app): State<AppState>) -> impl IntoResponse {
    let store = app.store.read().await;
    let views: Vec<MonitorView> = store
        .monitors()
        .iter()
        .map(|m| MonitorView {
            monitor: m.clone(),
            status: store.state(&m.id).status,
        })
        .collect();
    Json(views)
}

#[derive(Debug, Deserialize)]
struct NewMonitor {
    name: String,
    target: String,
    #[serde(default)]
    kind: ProbeKind,
    group_id: String,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default, with = "humantime_serde")]
    interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    #[serde(default)]
    notifications_enabled: Option<bool>,
}

async fn create_monitor(
    State(app): State<AppState>,
    payload: std::result::Result<Json<NewMonitor>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let new = json_body(payload)?;
    if new.name.trim().is_empty() {
        return Err(UptimeError::Validation(
            "monitor name must not be empty".to_string(),
        ));
    }
    let monitor = Monitor {
        id: Uuid::new_v4().to_string(),
        name: new.name.trim().to_string(),
        target: new.target,
        kind: new.kind,
        group_id: new.group_id,
        active: new.active.unwrap_or(true),
        interval: new.interval.unwrap_or(app.monitor_defaults.default_interval),
        timeout: new.timeout.unwrap_or(app.monitor_defaults.default_timeout),
        notifications_enabled: new.notifications_enabled.unwrap_or(true),
    };
    app.store.write().await.add_monitor(monitor.clone())?;

    if let (true, Some(engine)) = (monitor.active, &app.engine) {
        // The task ends with the engine's cancellation token
        drop(engine.start_monitor(monitor.clone()).await);
    }
    Ok((StatusCode::CREATED, Json(monitor)))
}

async fn monitor_state(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let store = app.store.read().await;
    if store.monitor(&id).is_none() {
        return Err(UptimeError::NotFound(format!("monitor '{}'", id)));
    }
    Ok(Json(store.state(&id)))
}

/// Run one check now and answer with its result
async fn check_monitor(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let active = app
        .store
        .read()
        .await
        .monitor(&id)
        .map(|m| m.active)
        .ok_or_else(|| UptimeError::NotFound(format!("monitor '{}'", id)))?;
    if !active {
        return Err(UptimeError::Conflict(format!("monitor '{}' is paused", id)));
    }
    let engine = app
        .engine
        .as_ref()
        .ok_or_else(|| UptimeError::Conflict("the engine is not running".to_string()))?;
    Ok(Json(engine.check_now(&id).await?))
}

async fn get_smtp(State(app): State<AppState>) -> impl IntoResponse {
    let settings = app.store.read().await.smtp_settings().map(SmtpSettings::redacted);
    Json(settings)
}

async fn put_smtp(
    State(app): State<AppState>,
    payload: std::result::Result<Json<SmtpSettings>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let mut settings = json_body(payload)?;
    let mut store = app.store.write().await;

    // Echoing the redacted placeholder back keeps the stored password
    if settings.password == REDACTED {
        settings.password = store
            .smtp_settings()
            .map(|s| s.password.clone())
            .unwrap_or_default();
    }
    if let Some(path) = &app.smtp_settings_file {
        store::save_smtp_settings(path, &settings)?;
    }
    store.set_smtp_settings(settings.clone());
    Ok(Json(settings.redacted()))
}

#[derive(Debug, Default, Deserialize)]
struct SmtpTestRequest {
    #[serde(default)]
    to: Vec<String>,
}

async fn test_smtp(
    State(app): State<AppState>,
    payload: Option<Json<SmtpTestRequest>>,
) -> Result<impl IntoResponse> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    app.dispatcher.send_test(request.to).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "test email sent"
    })))
}

#[derive(Debug, Deserialize)]
struct NotificationQuery {
    monitor_id: Option<String>,
}

async fn list_notifications(
    State(app): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> impl IntoResponse {
    let store = app.store.read().await;
    let attempts: Vec<_> = store
        .attempts()
        .iter()
        .filter(|a| {
            query
                .monitor_id
                .as_deref()
                .is_none_or(|id| a.monitor_id == id)
        })
        .cloned()
        .collect();
    Json(attempts)
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

fn report_window(
    query: std::result::Result<Query<ReportQuery>, QueryRejection>,
) -> Result<ReportWindow> {
    let Query(query) = query.map_err(|e| UptimeError::Validation(e.body_text()))?;
    let end = query.to.unwrap_or_else(Utc::now);
    match query.from {
        Some(start) => ReportWindow::new(start, end),
        None => Ok(ReportWindow::last_days(end, DEFAULT_REPORT_DAYS)),
    }
}

async fn report_json(
    State(app): State<AppState>,
    Path(group): Path<String>,
    query: std::result::Result<Query<ReportQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let window = report_window(query)?;
    Ok(Json(app.reports.aggregate(&group, &window).await?))
}

async fn report_text(
    State(app): State<AppState>,
    Path(group): Path<String>,
    query: std::result::Result<Query<ReportQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let window = report_window(query)?;
    let summary = app.reports.aggregate(&group, &window).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        pdf::render_text(&summary),
    ))
}

async fn report_pdf(
    State(app): State<AppState>,
    Path(group): Path<String>,
    query: std::result::Result<Query<ReportQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let window = report_window(query)?;
    let summary = app.reports.aggregate(&group, &window).await?;
    let disposition = format!(
        "attachment; filename=\"uptime-report-{}.pdf\"",
        summary.group_id
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pdf::render_pdf(&summary),
    ))
}

#[derive(Debug, Deserialize)]
struct GroupFilter {
    group_id: Option<String>,
}

async fn list_report_configs(
    State(app): State<AppState>,
    Query(filter): Query<GroupFilter>,
) -> impl IntoResponse {
    let store = app.store.read().await;
    let configs: Vec<_> = store
        .report_configs()
        .iter()
        .filter(|c| filter.group_id.as_deref().is_none_or(|g| c.group_id == g))
        .cloned()
        .collect();
    Json(configs)
}

async fn create_report_config(
    State(app): State<AppState>,
    payload: std::result::Result<Json<NewReportConfig>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let new = json_body(payload)?;
    let config = app.store.write().await.add_report_config(new)?;
    Ok((StatusCode::CREATED, Json(config)))
}

async fn update_report_config(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    payload: std::result::Result<Json<ReportConfigUpdate>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let update = json_body(payload)?;
    Ok(Json(app.store.write().await.update_report_config(id, update)?))
}

async fn delete_report_config(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    app.store.write().await.remove_report_config(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn report_history(
    State(app): State<AppState>,
    Query(filter): Query<GroupFilter>,
) -> impl IntoResponse {
    let store = app.store.read().await;
    let history: Vec<_> = store
        .report_history()
        .iter()
        .filter(|r| filter.group_id.as_deref().is_none_or(|g| r.group_id == g))
        .cloned()
        .collect();
    Json(history)
}

#[derive(Debug, Deserialize)]
struct SendMonthlyRequest {
    /// Group id or slug
    group_id: String,
    year: i32,
    month: u32,
    recipients: Vec<String>,
}

/// Mail one month's report right away, outside any schedule
async fn send_monthly_report(
    State(app): State<AppState>,
    payload: std::result::Result<Json<SendMonthlyRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = json_body(payload)?;
    let window = ReportWindow::month(request.year, request.month)?;
    let record = app
        .monthly
        .send(&request.group_id, window, request.recipients, None)
        .await?;
    Ok(Json(record))
}
