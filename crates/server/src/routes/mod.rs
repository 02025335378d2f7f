//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                               - Liveness
//! GET  /health/ready                         - Readiness (pings the store)
//!
//! # Orders
//! POST /api/orders                           - Create order
//! GET  /api/orders/user                      - Caller's orders
//! GET  /api/orders/{id}                      - Order detail (owner or admin)
//! GET  /api/orders/admin/all                 - All orders (admin)
//! GET  /api/orders/admin/sales?days=N        - Daily sales (admin)
//! PUT  /api/orders/admin/{id}                - Status update (admin)
//!
//! # Payments
//! POST /api/payments/create-checkout-session - Start embedded checkout
//! POST /api/payments/webhook                 - Provider events (signed raw body)
//! GET  /api/payments/session-status          - Session state + reconciliation
//! ```

pub mod health;
pub mod orders;
pub mod payments;

use axum::Router;

use crate::db::Store;
use crate::state::AppState;

/// All routes.
pub fn routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .merge(health::router())
        .merge(orders::router())
        .merge(payments::router())
}
