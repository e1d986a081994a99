//! Access gate: CORS allow-list, per-client rate limit, bearer tokens
//!
//! The stages are separate axum middleware functions and always run in the
//! order CORS, rate limit, auth. Each stage rejects with its own status so
//! a failing request is attributable to exactly one stage.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::ServerConfig;
use crate::{Result, UptimeError};

pub const MISSING_TOKEN: &str = "missing bearer token";
pub const INVALID_TOKEN: &str = "invalid or expired token";

/// Origins allowed to call the API from a browser
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>) -> Self {
        let allowed = allowed
            .into_iter()
            .map(|o| o.trim_end_matches('/').to_string())
            .collect();
        Self { allowed }
    }

    /// Requests without an `Origin` header are not cross-origin and pass
    pub fn check(&self, origin: Option<&str>) -> Result<()> {
        match origin {
            None => Ok(()),
            Some(origin) if self.allowed.iter().any(|a| a == origin) => Ok(()),
            Some(origin) => Err(UptimeError::Forbidden(format!(
                "origin '{}' is not allowed by CORS policy",
                origin
            ))),
        }
    }

    /// Response-header side of CORS for allowed origins
    pub fn cors_layer(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true)
    }
}

/// Sliding-window request log per client
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    log: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests as usize,
            window,
            log: DashMap::new(),
        }
    }

    pub fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    /// Admit and record one request at `now`, or refuse it without recording
    pub fn check_at(&self, client: &str, now: Instant) -> bool {
        // The entry guard holds the shard lock, so trim, compare and push are atomic per client
        let mut entry = self.log.entry(client.to_string()).or_default();
        while let Some(oldest) = entry.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() >= self.max_requests {
            return false;
        }
        entry.push_back(now);
        true
    }

    /// Forget clients whose whole log has aged out
    pub fn sweep(&self, now: Instant) {
        self.log.retain(|_, log| {
            log.back()
                .is_some_and(|last| now.saturating_duration_since(*last) < self.window)
        });
    }
}

/// Bearer token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 token issuing and validation with one shared secret
#[derive(Clone)]
pub struct TokenValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(&self, subject: &str, ttl: Duration) -> Result<String> {
        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        let claims = Claims {
            sub: subject.to_string(),
            iat,
            exp: iat.saturating_add(ttl),
        };
        self.encode(&claims)
    }

    pub fn encode(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| UptimeError::Config(format!("failed to sign token: {}", e)))
    }

    /// Check an `Authorization` header value
    pub fn validate(&self, authorization: Option<&str>) -> Result<Claims> {
        let token = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty());
        let Some(token) = token else {
            return Err(UptimeError::Auth(MISSING_TOKEN.to_string()));
        };

        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Rejected bearer token: {}", e);
                UptimeError::Auth(INVALID_TOKEN.to_string())
            })
    }
}

/// Shared state for the three gate stages
#[derive(Clone)]
pub struct Gate {
    pub origins: Arc<OriginPolicy>,
    pub limiter: Arc<RateLimiter>,
    pub tokens: Arc<TokenValidator>,
    pub trusted_proxies: Arc<Vec<IpAddr>>,
}

impl Gate {
    pub fn from_config(server: &ServerConfig) -> Self {
        Self {
            origins: Arc::new(OriginPolicy::new(server.allowed_origins.clone())),
            limiter: Arc::new(RateLimiter::new(
                server.rate_limit.max_requests,
                server.rate_limit.window,
            )),
            tokens: Arc::new(TokenValidator::new(&server.token_secret)),
            trusted_proxies: Arc::new(server.trusted_proxies.clone()),
        }
    }
}

/// Rate-limit key: the peer address
///
/// `X-Forwarded-For` is only read when the peer is a trusted proxy. The
/// header is walked from the right and the first hop that is not itself a
/// trusted proxy is the client; hops that are not IP addresses are ignored.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &[IpAddr]) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };
    if !trusted.contains(&peer) {
        return peer.to_string();
    }
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .find(|hop| !trusted.contains(hop))
        .unwrap_or(peer)
        .to_string()
}

pub async fn cors_stage(State(gate): State<Gate>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = gate.origins.check(origin) {
        tracing::warn!("{} {} rejected: {}", request.method(), request.uri(), e);
        return e.into_response();
    }
    next.run(request).await
}

pub async fn rate_limit_stage(State(gate): State<Gate>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_key(request.headers(), peer, &gate.trusted_proxies);
    if !gate.limiter.check(&client) {
        tracing::warn!("Rate limit exceeded for {}", client);
        return UptimeError::RateLimited.into_response();
    }
    next.run(request).await
}

pub async fn auth_stage(State(gate): State<Gate>, mut request: Request, next: Next) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match gate.tokens.validate(authorization) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
