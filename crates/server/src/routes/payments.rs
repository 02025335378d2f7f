//! Checkout and payment webhook routes.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::HeaderMap,
    routing::{get, post},
};
use serde::Deserialize;
use tracing::instrument;

use shopwright_core::OrderId;

use crate::checkout::{CheckoutHandle, SessionStatusView};
use crate::db::Store;
use crate::error::AppError;
use crate::middleware::RequireAuth;
use crate::payments::{SIGNATURE_HEADER, WebhookAck};
use crate::state::AppState;

pub fn router<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route(
            "/api/payments/create-checkout-session",
            post(create_checkout_session::<S>),
        )
        .route("/api/payments/webhook", post(webhook::<S>))
        .route("/api/payments/session-status", get(session_status::<S>))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutRequest {
    order_id: OrderId,
}

async fn create_checkout_session<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutHandle>, AppError> {
    let Json(request) = payload?;
    Ok(Json(
        state
            .checkout()
            .create_checkout_session(request.order_id, &user)
            .await?,
    ))
}

/// Handle a payment provider webhook.
///
/// The body is taken raw: the signature covers the exact bytes sent.
#[instrument(skip(state, headers, body))]
async fn webhook<S: Store>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    Ok(Json(state.payments().handle_event(&body, signature).await?))
}

#[derive(Debug, Deserialize)]
struct SessionStatusQuery {
    session_id: String,
}

async fn session_status<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    query: Result<Query<SessionStatusQuery>, QueryRejection>,
) -> Result<Json<SessionStatusView>, AppError> {
    let Query(query) = query?;
    Ok(Json(
        state
            .checkout()
            .get_session_status(&query.session_id, &user)
            .await?,
    ))
}
