//! Order routes.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;

use shopwright_core::OrderId;

use crate::db::Store;
use crate::error::AppError;
use crate::middleware::{RequireAdmin, RequireAuth};
use crate::models::{DailySales, OrderView};
use crate::orders::{CreateOrderRequest, StatusUpdate};
use crate::state::AppState;

/// Default window of the sales report, in days.
const DEFAULT_REPORT_DAYS: u32 = 7;

pub fn router<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/api/orders", post(create_order::<S>))
        .route("/api/orders/user", get(list_user_orders::<S>))
        .route("/api/orders/admin/all", get(list_all_orders::<S>))
        .route("/api/orders/admin/sales", get(sales_report::<S>))
        .route("/api/orders/admin/{id}", put(update_status::<S>))
        .route("/api/orders/{id}", get(get_order::<S>))
}

async fn create_order<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let order = state.orders().create_order(&user.user_id, &request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    id: Result<Path<OrderId>, PathRejection>,
) -> Result<Json<OrderView>, AppError> {
    let Path(id) = id.map_err(|e| AppError::Validation(e.body_text()))?;
    Ok(Json(state.orders().get_order(id, &user).await?))
}

async fn list_user_orders<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Vec<OrderView>>, AppError> {
    Ok(Json(state.orders().list_user_orders(&user.user_id).await?))
}

async fn list_all_orders<S: Store>(
    State(state): State<AppState<S>>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<OrderView>>, AppError> {
    Ok(Json(state.orders().list_all_orders().await?))
}

async fn update_status<S: Store>(
    State(state): State<AppState<S>>,
    RequireAdmin(admin): RequireAdmin,
    id: Result<Path<OrderId>, PathRejection>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<OrderView>, AppError> {
    let Path(id) = id.map_err(|e| AppError::Validation(e.body_text()))?;
    let Json(update) = payload?;
    tracing::info!(
        admin = %admin.user_id,
        order_id = %id,
        order_status = ?update.order_status,
        payment_status = ?update.payment_status,
        "Admin status update"
    );
    Ok(Json(state.orders().update_status(id, update).await?))
}

#[derive(Debug, Deserialize)]
struct SalesQuery {
    days: Option<u32>,
}

async fn sales_report<S: Store>(
    State(state): State<AppState<S>>,
    RequireAdmin(_admin): RequireAdmin,
    query: Result<Query<SalesQuery>, QueryRejection>,
) -> Result<Json<Vec<DailySales>>, AppError> {
    let Query(query) = query?;
    let days = query.days.unwrap_or(DEFAULT_REPORT_DAYS);
    Ok(Json(state.orders().sales_report(days).await?))
}
