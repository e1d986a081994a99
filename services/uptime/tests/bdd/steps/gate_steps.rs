//! BDD step definitions for access gate feature

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request};
use chrono::Utc;
use cucumber::{given, then, when};
use tower::ServiceExt;
use uptime::api::{build_router, AppState};
use uptime::config::{
    EngineConfig, NotificationConfig, RateLimitConfig, ReportsConfig, ServerConfig,
};
use uptime::dispatcher::NotificationDispatcher;
use uptime::gate::{Claims, Gate, TokenValidator};
use uptime::monthly::MonthlyReporter;
use uptime::report::ReportAggregator;
use uptime::status::StatusPresenter;

use crate::world::{RecordingMailer, UptimeWorld, TOKEN_SECRET};

async fn send(world: &mut UptimeWorld, request: Request<Body>) {
    let router = world.router.clone().expect("no API configured");
    let response = router.oneshot(request).await.unwrap();
    let status = response.status().as_u16();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    world
        .responses
        .push((status, String::from_utf8_lossy(&body).to_string()));
}

/// Request as it arrives from the peer `client`
fn get_from(uri: &str, client: &str) -> axum::http::request::Builder {
    let peer = SocketAddr::new(client.parse().expect("client must be an IP"), 40000);
    Request::builder().uri(uri).extension(ConnectInfo(peer))
}

fn get(uri: &str) -> axum::http::request::Builder {
    get_from(uri, "203.0.113.7")
}

fn tokens() -> TokenValidator {
    TokenValidator::new(TOKEN_SECRET)
}

#[given(expr = "an API allowing origin {string} with a limit of {int} requests per minute")]
async fn api(world: &mut UptimeWorld, origin: String, max_requests: u32) {
    world.add_group("clients", Some("ops@example.com")).await;
    let store = world.store();
    let mailer = Arc::new(RecordingMailer::default());
    let dispatcher =
        NotificationDispatcher::new(store.clone(), mailer.clone(), NotificationConfig::default());
    let state = AppState {
        store: store.clone(),
        dispatcher,
        reports: ReportAggregator::new(store.clone()),
        monthly: MonthlyReporter::new(store.clone(), mailer, ReportsConfig::default(), 3),
        status: StatusPresenter::new(store.clone(), 10),
        engine: None,
        monitor_defaults: EngineConfig::default(),
        smtp_settings_file: None,
    };
    let server = ServerConfig {
        allowed_origins: vec![origin],
        rate_limit: RateLimitConfig {
            max_requests,
            window: Duration::from_secs(60),
        },
        token_secret: TOKEN_SECRET.to_string(),
        ..ServerConfig::default()
    };
    world.router = Some(build_router(state, Gate::from_config(&server)));
}

#[when(expr = "{string} is requested without a token")]
async fn without_token(world: &mut UptimeWorld, uri: String) {
    send(world, get(&uri).body(Body::empty()).unwrap()).await;
}

async fn send_with_token(world: &mut UptimeWorld, uri: &str, token: &str) {
    let request = get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    send(world, request).await;
}

#[when(expr = "{string} is requested with the token {string}")]
async fn with_token(world: &mut UptimeWorld, uri: String, token: String) {
    send_with_token(world, &uri, &token).await;
}

#[when(expr = "{string} is requested with a valid token")]
async fn with_valid_token(world: &mut UptimeWorld, uri: String) {
    let token = tokens().issue("admin", Duration::from_secs(3600)).unwrap();
    send_with_token(world, &uri, &token).await;
}

#[when(expr = "{string} is requested with an expired token")]
async fn with_expired_token(world: &mut UptimeWorld, uri: String) {
    let now = Utc::now().timestamp();
    let token = tokens()
        .encode(&Claims {
            sub: "admin".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        })
        .unwrap();
    send_with_token(world, &uri, &token).await;
}

#[when(expr = "{string} is requested {int} times from {string}")]
async fn requested_repeatedly(world: &mut UptimeWorld, uri: String, times: usize, client: String) {
    for _ in 0..times {
        let request = get_from(&uri, &client).body(Body::empty()).unwrap();
        send(world, request).await;
    }
}

#[when(expr = "{string} is requested {int} times from {string} forwarding for a new address each time")]
async fn requested_with_rotating_forwarded_for(
    world: &mut UptimeWorld,
    uri: String,
    times: usize,
    client: String,
) {
    for i in 0..times {
        let request = get_from(&uri, &client)
            .header("x-forwarded-for", format!("10.0.0.{}", i + 1))
            .body(Body::empty())
            .unwrap();
        send(world, request).await;
    }
}

#[when(expr = "{string} is requested from origin {string}")]
async fn requested_from_origin(world: &mut UptimeWorld, uri: String, origin: String) {
    let request = get(&uri)
        .header(header::ORIGIN, origin)
        .body(Body::empty())
        .unwrap();
    send(world, request).await;
}

#[then(expr = "the response status is {int}")]
async fn response_status(world: &mut UptimeWorld, status: u16) {
    let (actual, body) = world.last_response();
    assert_eq!(*actual, status, "body: {}", body);
}

#[then(expr = "the response mentions {string}")]
async fn response_mentions(world: &mut UptimeWorld, text: String) {
    let (_, body) = world.last_response();
    assert!(
        body.to_lowercase().contains(&text.to_lowercase()),
        "{:?} not in {}",
        text,
        body
    );
}

#[then(expr = "the first {int} responses have status {int}")]
async fn first_responses(world: &mut UptimeWorld, count: usize, status: u16) {
    assert!(world.responses.len() >= count);
    for (actual, body) in &world.responses[..count] {
        assert_eq!(*actual, status, "body: {}", body);
    }
}
