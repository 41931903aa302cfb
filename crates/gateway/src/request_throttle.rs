//! Per-IP fixed-window request throttle.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    axum::{
        extract::{ConnectInfo, State},
        http::{HeaderMap, StatusCode},
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    cardvault_config::ThrottleConfig,
    dashmap::{DashMap, mapref::entry::Entry},
    tracing::debug,
};

#[cfg(feature = "metrics")]
use cardvault_metrics::{counter, http as http_metrics, labels};

use crate::server::AppState;

const CLEANUP_EVERY_REQUESTS: u64 = 512;
const WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct RequestThrottle {
    limits: ThrottleLimits,
    buckets: Arc<DashMap<ThrottleKey, WindowState>>,
    requests_seen: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ThrottleScope {
    Admin,
    Api,
}

impl ThrottleScope {
    fn from_path(path: &str) -> Option<Self> {
        if path.starts_with("/api/v1/admin/") {
            return Some(Self::Admin);
        }
        if path.starts_with("/api/") {
            return Some(Self::Api);
        }
        None
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ThrottleKey {
    ip: IpAddr,
    scope: ThrottleScope,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: usize,
}

#[derive(Debug, Clone, Copy)]
struct RateLimit {
    max_requests: usize,
    window: Duration,
}

impl RateLimit {
    fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests: usize::try_from(max_requests).unwrap_or(usize::MAX),
            window: WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ThrottleLimits {
    admin: RateLimit,
    api: RateLimit,
}

impl From<&ThrottleConfig> for ThrottleLimits {
    fn from(config: &ThrottleConfig) -> Self {
        Self {
            admin: RateLimit::per_minute(config.admin_per_minute),
            api: RateLimit::per_minute(config.api_per_minute),
        }
    }
}

enum ThrottleDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl RequestThrottle {
    #[must_use]
    pub fn new(config: &ThrottleConfig) -> Self {
        Self::with_limits(ThrottleLimits::from(config))
    }

    fn with_limits(limits: ThrottleLimits) -> Self {
        Self {
            limits,
            buckets: Arc::new(DashMap::new()),
            requests_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    fn limit_for(&self, scope: ThrottleScope) -> RateLimit {
        match scope {
            ThrottleScope::Admin => self.limits.admin,
            ThrottleScope::Api => self.limits.api,
        }
    }

    fn check(&self, ip: IpAddr, scope: ThrottleScope) -> ThrottleDecision {
        self.check_at(ip, scope, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, scope: ThrottleScope, now: Instant) -> ThrottleDecision {
        let limit = self.limit_for(scope);
        if limit.max_requests == 0 {
            return ThrottleDecision::Denied {
                retry_after: limit.window.max(Duration::from_secs(1)),
            };
        }

        let key = ThrottleKey { ip, scope };
        let decision = match self.buckets.entry(key) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.duration_since(state.started_at);
                if elapsed >= limit.window {
                    state.started_at = now;
                    state.count = 1;
                    ThrottleDecision::Allowed
                } else if state.count < limit.max_requests {
                    state.count += 1;
                    ThrottleDecision::Allowed
                } else {
                    ThrottleDecision::Denied {
                        retry_after: limit.window.saturating_sub(elapsed),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                ThrottleDecision::Allowed
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.requests_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(CLEANUP_EVERY_REQUESTS) {
            return;
        }
        let stale_after = self
            .limits
            .admin
            .window
            .max(self.limits.api.window)
            .saturating_mul(3);
        self.buckets
            .retain(|_, state| now.duration_since(state.started_at) <= stale_after);
    }
}

pub async fn throttle_gate(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(scope) = ThrottleScope::from_path(request.uri().path()) else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = resolve_client_ip(request.headers(), peer, state.behind_proxy);
    match state.throttle.check(client_ip, scope) {
        ThrottleDecision::Allowed => next.run(request).await,
        ThrottleDecision::Denied { retry_after } => {
            debug!(%client_ip, scope = scope.as_str(), "request throttled");
            #[cfg(feature = "metrics")]
            counter!(http_metrics::THROTTLED_TOTAL, labels::ENDPOINT => scope.as_str())
                .increment(1);
            rate_limited_response(retry_after)
        },
    }
}

fn rate_limited_response(retry_after: Duration) -> Response {
    let retry_after_secs = retry_after.as_secs().max(1);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "too many requests",
            "retry_after_seconds": retry_after_secs
        })),
    )
        .into_response();

    if let Ok(value) = retry_after_secs.to_string().parse() {
        response
            .headers_mut()
            .insert(axum::http::header::RETRY_AFTER, value);
    }
    response
}

/// Without a peer address (in-process callers) every request shares the
/// unspecified address bucket.
fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, behind_proxy: bool) -> IpAddr {
    if behind_proxy && let Some(ip) = extract_forwarded_ip(headers) {
        return ip;
    }
    peer.map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |addr| addr.ip())
}

fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
    if let Some(xff) = xff
        && let Some(ip) = xff
            .split(',')
            .find_map(|candidate| parse_ip(candidate.trim()))
    {
        return Some(ip);
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_ip(v.trim()))
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    if value.is_empty() {
        return None;
    }
    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(api: u32, admin: u32) -> RequestThrottle {
        RequestThrottle::new(&ThrottleConfig {
            api_per_minute: api,
            admin_per_minute: admin,
        })
    }

    #[test]
    fn classify_paths() {
        assert_eq!(
            ThrottleScope::from_path("/api/v1/admin/keys"),
            Some(ThrottleScope::Admin)
        );
        assert_eq!(
            ThrottleScope::from_path("/api/v1/cards"),
            Some(ThrottleScope::Api)
        );
        assert_eq!(ThrottleScope::from_path("/health"), None);
        assert_eq!(ThrottleScope::from_path("/metrics"), None);
    }

    #[test]
    fn admin_window_limits_requests() {
        let throttle = throttle(100, 2);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let now = Instant::now();

        for _ in 0..2 {
            assert!(matches!(
                throttle.check_at(ip, ThrottleScope::Admin, now),
                ThrottleDecision::Allowed
            ));
        }
        match throttle.check_at(ip, ThrottleScope::Admin, now + Duration::from_secs(15)) {
            ThrottleDecision::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(45));
            },
            ThrottleDecision::Allowed => panic!("expected third request to be throttled"),
        }

        // The API scope keeps its own budget.
        assert!(matches!(
            throttle.check_at(ip, ThrottleScope::Api, now),
            ThrottleDecision::Allowed
        ));
        assert!(matches!(
            throttle.check_at(ip, ThrottleScope::Admin, now + Duration::from_secs(61)),
            ThrottleDecision::Allowed
        ));
    }

    #[test]
    fn clients_are_counted_separately() {
        let throttle = throttle(1, 1);
        let now = Instant::now();
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(matches!(
            throttle.check_at(a, ThrottleScope::Api, now),
            ThrottleDecision::Allowed
        ));
        assert!(matches!(
            throttle.check_at(a, ThrottleScope::Api, now),
            ThrottleDecision::Denied { .. }
        ));
        assert!(matches!(
            throttle.check_at(b, ThrottleScope::Api, now),
            ThrottleDecision::Allowed
        ));
    }

    #[test]
    fn zero_limit_denies_everything() {
        let throttle = throttle(0, 0);
        assert!(matches!(
            throttle.check_at(IpAddr::V4(Ipv4Addr::LOCALHOST), ThrottleScope::Api, Instant::now()),
            ThrottleDecision::Denied { .. }
        ));
    }

    #[test]
    fn forwarded_ip_only_trusted_behind_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            axum::http::HeaderValue::from_static("203.0.113.1, 198.51.100.9"),
        );
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        assert_eq!(
            resolve_client_ip(&headers, Some(peer), true),
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1))
        );
        assert_eq!(
            resolve_client_ip(&headers, Some(peer), false),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }

    #[test]
    fn real_ip_header_is_a_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-real-ip",
            axum::http::HeaderValue::from_static("198.51.100.7:443"),
        );
        assert_eq!(
            extract_forwarded_ip(&headers),
            Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)))
        );
    }
}
