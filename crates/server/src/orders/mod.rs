//! Order lifecycle: creation, reads and status transitions.
//!
//! Every status write runs in one unit of work together with the stock
//! mutation it implies (see [`transitions`]), and the unit is retried as a
//! whole on transient store failures.

pub mod transitions;
pub mod view;

use chrono::{Days, NaiveTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument};

use shopwright_core::{
    OrderId, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, UserId,
};

use crate::alerts::{self, OpsAlert};
use crate::db::{OrderTx, RepositoryError, Store, Transient, retry_transient};
use crate::identity::AuthUser;
use crate::inventory::{SkippedRestore, StockError, StockLedger, decrement_within, restore_within};
use crate::models::{DailySales, NewAddress, NewOrder, Order, OrderFilter, OrderView};

use transitions::{StockEffect, Transition, TransitionError};

/// Longest sales report window, in days.
pub const MAX_REPORT_DAYS: u32 = 366;

/// Errors from order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("{0}")]
    Validation(String),

    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("not allowed to access order {0}")]
    Forbidden(OrderId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl Transient for OrderError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Stock(e) => e.is_transient(),
            Self::Repository(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Body of a create-order request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub order_items: Vec<OrderItem>,
    pub shipping_address: NewAddress,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

impl CreateOrderRequest {
    /// Check items and address.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Validation` listing every problem found.
    pub fn validate(&self) -> Result<(), OrderError> {
        let mut problems = Vec::new();
        if self.order_items.is_empty() {
            problems.push("orderItems must not be empty".to_string());
        }
        for (i, item) in self.order_items.iter().enumerate() {
            if item.quantity == 0 {
                problems.push(format!("orderItems[{i}].quantity must be positive"));
            } else if i32::try_from(item.quantity).is_err() {
                problems.push(format!("orderItems[{i}].quantity is too large"));
            }
        }
        problems.extend(self.shipping_address.validate());

        if problems.is_empty() {
            Ok(())
        } else {
            Err(OrderError::Validation(problems.join("; ")))
        }
    }
}

/// Body of an administrative status update.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(default)]
    pub order_status: Option<OrderStatus>,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
}

/// Apply an allowed transition inside a unit of work.
///
/// Performs the stock effect first, then writes both status fields. Returns
/// the updated order and any items whose stock could not be restored.
///
/// # Errors
///
/// Returns a [`StockError`] if stock cannot be decremented or the store fails;
/// the unit of work must then be dropped.
pub async fn apply_within<T: OrderTx>(
    tx: &mut T,
    order: &Order,
    transition: Transition,
) -> Result<(Order, Vec<SkippedRestore>), StockError> {
    let skipped = match transition.stock {
        StockEffect::Decrement => {
            decrement_within(tx, &order.items).await?;
            Vec::new()
        }
        StockEffect::Restore => restore_within(tx, &order.items).await?,
        StockEffect::None => Vec::new(),
    };
    let updated = tx
        .set_order_status(order.id, transition.order_status, transition.payment_status)
        .await?;
    Ok((updated, skipped))
}

/// Raise an alert for every restore that had to be skipped.
pub fn report_skipped_restores(order_id: OrderId, skipped: &[SkippedRestore]) {
    for skip in skipped {
        alerts::raise(&OpsAlert::RestoreSkippedMissingProduct {
            order_id,
            product_id: skip.product_id,
            quantity: skip.quantity,
        });
    }
}

/// Order lifecycle service.
#[derive(Debug, Clone)]
pub struct OrderService<S> {
    store: S,
    ledger: StockLedger<S>,
}

impl<S: Store> OrderService<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            ledger: StockLedger::new(store.clone()),
            store,
        }
    }

    /// Create an order in `PENDING`/`PENDING` after checking availability.
    ///
    /// Stock is not reserved here; it is taken when the order is paid.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed input, `Stock` if a product is
    /// missing or short, or a repository error.
    #[instrument(skip(self, request), fields(user_id = %user_id, items = request.order_items.len()))]
    pub async fn create_order(
        &self,
        user_id: &UserId,
        request: &CreateOrderRequest,
    ) -> Result<OrderView, OrderError> {
        request.validate()?;
        self.ledger
            .validate_availability(&request.order_items)
            .await?;

        let address = request.shipping_address.normalized();
        let store = &self.store;
        let order = retry_transient("create_order", || {
            let address = &address;
            async move {
                let mut tx = store.begin().await?;
                let address = tx.insert_address(address).await?;
                let order = tx
                    .insert_order(&NewOrder {
                        user_id: user_id.clone(),
                        items: request.order_items.clone(),
                        address_id: address.id,
                        payment_method: request.payment_method.unwrap_or_default(),
                    })
                    .await?;
                tx.commit().await?;
                Ok::<_, RepositoryError>(order)
            }
        })
        .await?;

        info!(order_id = %order.id, "Order created");
        Ok(view::compose_one(&self.store, order).await?)
    }

    /// Read one order.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the order does not exist and `Forbidden` if the
    /// requester neither owns it nor is an administrator.
    #[instrument(skip(self, requester), fields(order_id = %id))]
    pub async fn get_order(&self, id: OrderId, requester: &AuthUser) -> Result<OrderView, OrderError> {
        let order = self.find_accessible(id, requester).await?;
        Ok(view::compose_one(&self.store, order).await?)
    }

    /// Load an order the requester may act on.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Forbidden` as for [`OrderService::get_order`].
    pub async fn find_accessible(
        &self,
        id: OrderId,
        requester: &AuthUser,
    ) -> Result<Order, OrderError> {
        let order = self
            .store
            .find_order(id)
            .await?
            .ok_or(OrderError::NotFound(id))?;
        if !requester.can_access(&order.user_id) {
            tracing::warn!(
                target: "security",
                order_id = %id,
                requester = %requester.user_id,
                "Order access denied"
            );
            return Err(OrderError::Forbidden(id));
        }
        Ok(order)
    }

    /// The requester's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns a repository error.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_user_orders(&self, user_id: &UserId) -> Result<Vec<OrderView>, OrderError> {
        let orders = self
            .store
            .list_orders(&OrderFilter::for_user(user_id.clone()))
            .await?;
        Ok(view::compose(&self.store, orders).await?)
    }

    /// Every order, newest first.
    ///
    /// # Errors
    ///
    /// Returns a repository error.
    #[instrument(skip(self))]
    pub async fn list_all_orders(&self) -> Result<Vec<OrderView>, OrderError> {
        let orders = self.store.list_orders(&OrderFilter::all()).await?;
        Ok(view::compose(&self.store, orders).await?)
    }

    /// Apply an administrative status update.
    ///
    /// Cancelling or refunding a paid order restores its stock once; marking
    /// an unpaid order paid takes its stock. The stock change and the status
    /// write commit together.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Transition` for disallowed moves, `Stock` when a
    /// payment cannot take its stock, or a repository error.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn update_status(
        &self,
        id: OrderId,
        update: StatusUpdate,
    ) -> Result<OrderView, OrderError> {
        if update.order_status.is_none() && update.payment_status.is_none() {
            return Err(OrderError::Validation(
                "orderStatus or paymentStatus is required".to_string(),
            ));
        }

        let store = &self.store;
        let (order, skipped) = retry_transient("update_order_status", || async move {
            let mut tx = store.begin().await?;
            let order = tx.lock_order(id).await?.ok_or(OrderError::NotFound(id))?;
            let transition = transitions::plan_update(
                order.order_status,
                order.payment_status,
                update.order_status,
                update.payment_status,
            )?;
            if !transition.changes(order.order_status, order.payment_status) {
                return Ok((order, Vec::new()));
            }

            let (updated, skipped) = apply_within(&mut tx, &order, transition).await?;
            tx.commit().await?;
            info!(
                order_id = %id,
                from_order = %order.order_status,
                to_order = %updated.order_status,
                from_payment = %order.payment_status,
                to_payment = %updated.payment_status,
                stock = ?transition.stock,
                "Order status updated"
            );
            Ok::<_, OrderError>((updated, skipped))
        })
        .await?;

        report_skipped_restores(order.id, &skipped);
        Ok(view::compose_one(&self.store, order).await?)
    }

    /// Daily totals of paid, non-cancelled orders over the last `days` days,
    /// today included.
    ///
    /// # Errors
    ///
    /// Returns `Validation` unless `1 <= days <= MAX_REPORT_DAYS`.
    #[instrument(skip(self))]
    pub async fn sales_report(&self, days: u32) -> Result<Vec<DailySales>, OrderError> {
        if days == 0 || days > MAX_REPORT_DAYS {
            return Err(OrderError::Validation(format!(
                "days must be between 1 and {MAX_REPORT_DAYS}"
            )));
        }
        let since = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .ok_or_else(|| OrderError::Validation("days out of range".to_string()))?
            .and_time(NaiveTime::MIN)
            .and_utc();
        Ok(self.store.daily_sales(since).await?)
    }
}
