use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use {
    axum::{
        Router,
        extract::State,
        http::{HeaderName, HeaderValue, Method, header},
        middleware,
        response::{IntoResponse, Json},
        routing::get,
    },
    cardvault_cards::CardService,
    cardvault_config::CardvaultConfig,
    tower_http::{
        cors::{AllowOrigin, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use cardvault_metrics::MetricsHandle;

use crate::{
    admin_routes::admin_router, auth::USER_ID_HEADER, card_routes::card_router,
    request_throttle::{RequestThrottle, throttle_gate},
    security_headers::security_headers,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub cards: Arc<CardService>,
    pub throttle: RequestThrottle,
    /// Trust forwarded-for headers when resolving the client address.
    pub behind_proxy: bool,
    #[cfg(feature = "metrics")]
    pub metrics: MetricsHandle,
}

impl AppState {
    #[must_use]
    pub fn new(cards: Arc<CardService>, config: &CardvaultConfig) -> Self {
        Self {
            cards,
            throttle: RequestThrottle::new(&config.throttle),
            behind_proxy: config.server.behind_proxy,
            #[cfg(feature = "metrics")]
            metrics: MetricsHandle::disabled(),
        }
    }

    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the router (shared between production startup and tests).
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1/cards", card_router())
        .nest("/api/v1/admin", admin_router());

    #[cfg(feature = "prometheus")]
    let router = router.route(
        "/metrics",
        get(crate::metrics_routes::prometheus_metrics_handler),
    );

    let router = router.layer(middleware::from_fn_with_state(
        state.clone(),
        throttle_gate,
    ));

    #[cfg(feature = "metrics")]
    let router = router.layer(middleware::from_fn(
        crate::metrics_middleware::http_metrics_middleware,
    ));

    router
        .layer(middleware::from_fn(security_headers))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::AUTHORIZATION,
            HeaderName::from_static(USER_ID_HEADER),
        ])
        .expose_headers([header::CONTENT_LENGTH])
        .max_age(Duration::from_secs(12 * 60 * 60));

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(AllowOrigin::any());
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%origin, error = %e, "ignoring invalid CORS origin");
                None
            },
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
}

/// Serve HTTP until ctrl-c.
pub async fn serve(config: &CardvaultConfig, state: AppState) -> anyhow::Result<()> {
    let ip: IpAddr = config.server.bind.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let app = build_router(state, &config.server.cors_origins);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "cardvault listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "key_version": state.cards.vault().current_version(),
        "rotating": state.cards.vault().is_rotating(),
    }))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{
            body::{Body, to_bytes},
            http::{Request, StatusCode},
        },
        cardvault_cards::{CardPolicy, InMemoryCardStore},
        cardvault_config::ThrottleConfig,
        cardvault_vault::Vault,
        serde_json::{Value, json},
        tower::ServiceExt,
        uuid::Uuid,
    };

    fn app_with(config: &CardvaultConfig) -> Router {
        let service = CardService::new(
            Arc::new(InMemoryCardStore::new()),
            Arc::new(Vault::new().unwrap()),
            CardPolicy::default(),
        );
        let state = AppState::new(Arc::new(service), config);
        build_router(state, &config.server.cors_origins)
    }

    fn app() -> Router {
        app_with(&CardvaultConfig::default())
    }

    fn card_body(number: &str) -> Value {
        json!({
            "cardholder_name": "Ada Lovelace",
            "card_number": number,
            "expiry_month": 12,
            "expiry_year": 2030,
            "cvv": "123",
        })
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        user: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user.to_string());
        }
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            },
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, value)
    }

    #[tokio::test]
    async fn health_is_public_and_hardened() {
        let (status, headers, body) = call(&app(), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["key_version"], 1);
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["content-security-policy"], "default-src 'self'");
        assert!(headers.contains_key("strict-transport-security"));
        assert!(headers.contains_key("referrer-policy"));
    }

    #[tokio::test]
    async fn card_routes_require_user() {
        let (status, _, body) = call(&app(), Method::GET, "/api/v1/cards", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn card_lifecycle() {
        let app = app();
        let user = Uuid::new_v4();

        let (status, _, created) = call(
            &app,
            Method::POST,
            "/api/v1/cards",
            Some(user),
            Some(card_body("4111 1111 1111 1111")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["masked_number"], "************1111");
        assert_eq!(created["card_type"], "Visa");
        assert!(created.get("cvv").is_none());
        let id = created["id"].as_str().unwrap().to_string();

        let (status, _, listed) =
            call(&app, Method::GET, "/api/v1/cards", Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let uri = format!("/api/v1/cards/{id}");
        let mut update = card_body("5555555555554444");
        update["cardholder_name"] = json!("Grace Hopper");
        let (status, _, updated) = call(&app, Method::PUT, &uri, Some(user), Some(update)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["cardholder_name"], "Grace Hopper");
        assert_eq!(updated["card_type"], "Mastercard");

        // Another user cannot see it.
        let (status, _, _) = call(&app, Method::GET, &uri, Some(Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = call(&app, Method::DELETE, &uri, Some(user), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _, body) = call(&app, Method::GET, &uri, Some(user), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn invalid_input_is_bad_request() {
        let app = app();
        let user = Some(Uuid::new_v4());

        let (status, _, body) = call(
            &app,
            Method::POST,
            "/api/v1/cards",
            user,
            Some(card_body("4111111111111112")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("validation failed"));

        let (status, _, _) = call(
            &app,
            Method::POST,
            "/api/v1/cards",
            user,
            Some(json!({ "cardholder_name": "Ada" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = call(&app, Method::GET, "/api/v1/cards/not-a-uuid", user, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_update_reports_each_item() {
        let app = app();
        let user = Uuid::new_v4();
        let (_, _, created) = call(
            &app,
            Method::POST,
            "/api/v1/cards",
            Some(user),
            Some(card_body("4111111111111111")),
        )
        .await;
        let id = created["id"].clone();
        let missing = Uuid::new_v4();

        let (status, _, results) = call(
            &app,
            Method::PATCH,
            "/api/v1/cards/batch-update",
            Some(user),
            Some(json!({
                "cards": [
                    { "id": id, "expiry_month": 6 },
                    { "id": missing, "cardholder_name": "Nobody" },
                    { "id": id },
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let results = results.as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["status"], "success");
        assert_eq!(results[1]["status"], "failed");
        assert_eq!(results[1]["card_id"], missing.to_string());
        assert_eq!(results[2]["status"], "skipped");
    }

    #[tokio::test]
    async fn rotation_through_admin_routes() {
        let app = app();
        let user = Uuid::new_v4();
        for number in ["4111111111111111", "378282246310005"] {
            call(
                &app,
                Method::POST,
                "/api/v1/cards",
                Some(user),
                Some(card_body(number)),
            )
            .await;
        }

        let (status, _, rotated) = call(
            &app,
            Method::POST,
            "/api/v1/admin/cards/rotate-keys",
            Some(user),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rotated["from_version"], 1);
        assert_eq!(rotated["to_version"], 2);
        assert_eq!(rotated["reencrypted"], 2);
        assert_eq!(rotated["failed"], 0);

        let (status, _, keys) =
            call(&app, Method::GET, "/api/v1/admin/keys", Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(keys["current_version"], 2);
        assert_eq!(keys["cards_on_current"], 2);

        // Cards stay readable after the rotation.
        let (status, _, listed) =
            call(&app, Method::GET, "/api/v1/cards", Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn admin_scope_is_throttled() {
        let config = CardvaultConfig {
            throttle: ThrottleConfig {
                api_per_minute: 100,
                admin_per_minute: 1,
            },
            ..CardvaultConfig::default()
        };
        let app = app_with(&config);
        let user = Some(Uuid::new_v4());

        let (status, _, _) = call(&app, Method::GET, "/api/v1/admin/keys", user, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, headers, body) =
            call(&app, Method::GET, "/api/v1/admin/keys", user, None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(headers.contains_key(header::RETRY_AFTER));
        assert_eq!(body["error"], "too many requests");

        // Card routes and health have their own budget.
        let (status, _, _) = call(&app, Method::GET, "/api/v1/cards", user, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/cards")
                    .header(header::ORIGIN, "https://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://localhost:3000"
        );
    }

    #[cfg(feature = "prometheus")]
    #[tokio::test]
    async fn metrics_route_reports_disabled_recorder() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
