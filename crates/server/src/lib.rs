//! Shopwright server library.
//!
//! Order lifecycle, stock ledger, checkout orchestration and payment event
//! processing, exposed over HTTP. The store and the payment provider are
//! traits so the whole service can run against in-memory fakes in tests.
//!
//! # Consistency
//!
//! - Stock is only ever decremented through a conditional update, so
//!   concurrent orders cannot oversell.
//! - Every order transition commits together with its stock effect.
//! - Payment events are recorded by provider event id in the same unit of
//!   work that applies them, so redelivery changes nothing.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod alerts;
pub mod checkout;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod inventory;
pub mod middleware;
pub mod models;
pub mod orders;
pub mod payments;
pub mod routes;
pub mod state;

use std::time::Duration;

use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode, header},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use db::Store;
use state::AppState;

/// Build the application router with its request middleware.
///
/// Origins that are not valid header values are skipped with a warning.
pub fn app<S: Store>(
    state: AppState<S>,
    cors_origins: &[String],
    request_timeout: Duration,
) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    routes::routes()
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri().path(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use secrecy::SecretString;
    use tower::ServiceExt;
    use url::Url;

    use shopwright_core::CurrencyCode;

    use super::*;
    use crate::config::IdentityConfig;
    use crate::db::MemoryStore;
    use crate::identity::TokenVerifier;
    use crate::payments::stripe::{CheckoutSession, SessionStatus};
    use crate::payments::{CheckoutSessionRequest, PaymentProvider, ProviderError, WebhookVerifier};

    struct OfflineProvider;

    #[async_trait]
    impl PaymentProvider for OfflineProvider {
        async fn create_checkout_session(
            &self,
            _request: &CheckoutSessionRequest,
        ) -> Result<CheckoutSession, ProviderError> {
            Err(ProviderError::Timeout)
        }

        async fn retrieve_session(&self, _session_id: &str) -> Result<SessionStatus, ProviderError> {
            Err(ProviderError::Timeout)
        }
    }

    fn test_app() -> Router {
        let state = AppState::new(
            MemoryStore::new(),
            Arc::new(OfflineProvider),
            TokenVerifier::new(&IdentityConfig {
                jwt_secret: SecretString::from("test-secret-test-secret-test-secret"),
                issuer: None,
            }),
            WebhookVerifier::new(SecretString::from("whsec_test"), Duration::from_secs(300)),
            CurrencyCode::USD,
            Url::parse("https://shop.test").unwrap(),
        );
        app(
            state,
            &["https://shop.test".to_string(), "not a\norigin".to_string()],
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin_only() {
        let preflight = |origin: &str| {
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/orders")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap()
        };

        let allowed = test_app().oneshot(preflight("https://shop.test")).await.unwrap();
        assert_eq!(
            allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://shop.test"
        );

        let denied = test_app().oneshot(preflight("https://evil.test")).await.unwrap();
        assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let response = test_app()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
