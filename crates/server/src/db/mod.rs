//! Persistence for products, orders, addresses and payment events.
//!
//! # Tables
//!
//! - `products` - Catalog products with the `stock` counter
//! - `addresses` - Shipping addresses, immutable once stored
//! - `orders` - Orders with their items as a JSONB array
//! - `payment_events` - Handled payment-provider events, keyed by event id
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p shopwright-cli -- migrate
//! ```
//!
//! # Units of work
//!
//! Services talk to a [`Store`]. Every mutation runs inside an [`OrderTx`]
//! obtained from [`Store::begin`]: committing applies all of its writes,
//! dropping it rolls them back. [`PgStore`] backs this with a Postgres
//! transaction, [`MemoryStore`] with a staged copy of in-process state.

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use shopwright_core::{AddressId, OrderId, OrderStatus, PaymentStatus, ProductId};

use crate::models::{
    Address, DailySales, NewAddress, NewOrder, NewPaymentEvent, Order, OrderFilter,
    PaymentEventRecord, Product,
};

pub use memory::{MemoryStore, MemoryTx};
pub use postgres::{PgStore, PgTx};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// The store cannot serve requests right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Classifies failures that may succeed when the whole unit of work is
/// retried.
pub trait Transient {
    /// Whether retrying the failed unit of work may succeed.
    fn is_transient(&self) -> bool;
}

/// `serialization_failure` and `deadlock_detected`.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

impl Transient for RepositoryError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::PoolTimedOut) | Self::Unavailable(_) => true,
            Self::Database(sqlx::Error::Database(db)) => db
                .code()
                .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code.as_ref())),
            _ => false,
        }
    }
}

/// Maximum number of attempts for one unit of work.
pub const MAX_ATTEMPTS: u32 = 3;

/// Run a unit of work, retrying it from the start on transient failures.
///
/// Each attempt must open its own transaction so that a retry never observes
/// partial writes of an earlier attempt.
///
/// # Errors
///
/// Returns the last error once it is not transient or attempts run out.
pub async fn retry_transient<T, E, F, Fut>(operation: &'static str, mut unit: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match unit().await {
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(operation, attempt, error = %e, "Transient failure, retrying");
                tokio::time::sleep(Duration::from_millis(25 * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Atomic stock mutations available inside a unit of work.
#[async_trait]
pub trait StockStore: Send {
    /// Read a product.
    async fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Decrement stock by `quantity` only if at least `quantity` is on hand.
    ///
    /// Returns the remaining stock, or `None` when the product is missing or
    /// short. The check and the write are a single store operation.
    async fn decrement_stock_if_available(
        &mut self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<i32>, RepositoryError>;

    /// Increment stock by `quantity`. Returns the new stock, or `None` when
    /// the product no longer exists.
    async fn increment_stock(
        &mut self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<i32>, RepositoryError>;
}

/// A unit of work over orders, stock and the payment-event ledger.
///
/// Dropping the value without calling [`OrderTx::commit`] discards every
/// write made through it.
#[async_trait]
pub trait OrderTx: StockStore {
    async fn insert_address(&mut self, address: &NewAddress) -> Result<Address, RepositoryError>;

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, RepositoryError>;

    /// Read an order and hold it against concurrent transitions until the
    /// unit of work ends.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Write both status fields of an order.
    async fn set_order_status(
        &mut self,
        id: OrderId,
        order_status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<Order, RepositoryError>;

    /// Record a handled event. Returns `false` if the event id was already
    /// recorded, in which case nothing is written.
    async fn record_payment_event(
        &mut self,
        event: &NewPaymentEvent,
    ) -> Result<bool, RepositoryError>;

    async fn commit(self) -> Result<(), RepositoryError>;
}

/// Entry point to persistence, shared by all services.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: OrderTx + 'static;

    /// Start a unit of work.
    async fn begin(&self) -> Result<Self::Tx, RepositoryError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    async fn find_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError>;

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn find_addresses(&self, ids: &[AddressId]) -> Result<Vec<Address>, RepositoryError>;

    /// Orders matching `filter`, newest first.
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError>;

    async fn find_payment_event(
        &self,
        event_id: &str,
    ) -> Result<Option<PaymentEventRecord>, RepositoryError>;

    /// Sales of paid, non-cancelled orders created since `since`, per day.
    async fn daily_sales(&self, since: DateTime<Utc>) -> Result<Vec<DailySales>, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_retry_transient_retries_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = retry_transient("test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RepositoryError::Unavailable("flaky".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert!(matches!(result, Ok(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_transient_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<(), _> = retry_transient("test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::Unavailable("down".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_retry_transient_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<(), _> = retry_transient("test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::NotFound)
        })
        .await;

        assert!(matches!(result, Err(RepositoryError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(RepositoryError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!RepositoryError::DataCorruption("x".to_string()).is_transient());
    }
}
