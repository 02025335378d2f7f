//! Stock ledger: availability checks and atomic stock mutations.
//!
//! Every write goes through the store's conditional decrement, so two
//! concurrent orders can never both take the last unit. Quantities are
//! aggregated per product and applied in ascending product id order, which
//! keeps row locks in a consistent order across transactions.

use std::collections::HashMap;

use thiserror::Error;
use tracing::instrument;

use shopwright_core::{OrderItem, ProductId, aggregate_quantities};

use crate::db::{OrderTx as _, RepositoryError, StockStore, Store, Transient, retry_transient};

/// Errors from stock operations.
#[derive(Debug, Error)]
pub enum StockError {
    /// An item references a product that does not exist.
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// Not enough units on hand.
    #[error("insufficient stock for {name}: {available} available, {requested} requested")]
    InsufficientStock {
        product_id: ProductId,
        name: String,
        available: i32,
        requested: u32,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl Transient for StockError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Repository(e) if e.is_transient())
    }
}

/// A quantity that could not be put back because the product is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedRestore {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Stock operations that run in their own unit of work.
#[derive(Debug, Clone)]
pub struct StockLedger<S> {
    store: S,
}

impl<S: Store> StockLedger<S> {
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Check that every item could be fulfilled right now.
    ///
    /// Read-only and reserves nothing: a concurrent order may still take the
    /// stock before this order is paid. The decrement is what enforces the
    /// limit.
    ///
    /// # Errors
    ///
    /// Returns `ProductNotFound` or `InsufficientStock` for the first failing
    /// product, or a repository error.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn validate_availability(&self, items: &[OrderItem]) -> Result<(), StockError> {
        let totals = aggregate_quantities(items);
        let ids: Vec<ProductId> = totals.keys().copied().collect();
        let products: HashMap<_, _> = self
            .store
            .find_products(&ids)
            .await?
            .into_iter()
            .map(|product| (product.id, product))
            .collect();

        for (product_id, requested) in totals {
            let product = products
                .get(&product_id)
                .ok_or(StockError::ProductNotFound(product_id))?;
            if i64::from(product.stock) < i64::from(requested) {
                return Err(StockError::InsufficientStock {
                    product_id,
                    name: product.name.clone(),
                    available: product.stock,
                    requested,
                });
            }
        }
        Ok(())
    }

    /// Take the items out of stock, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientStock` or `ProductNotFound` for the first product
    /// that cannot be decremented; no product is changed in that case.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn decrement_stock(&self, items: &[OrderItem]) -> Result<(), StockError> {
        let store = &self.store;
        retry_transient("decrement_stock", || async move {
            let mut tx = store.begin().await?;
            decrement_within(&mut tx, items).await?;
            tx.commit().await?;
            Ok::<_, StockError>(())
        })
        .await
    }

    /// Put the items back into stock.
    ///
    /// Callers must make sure an order's items are restored at most once; the
    /// order lifecycle does this through its stock-holding status guard.
    ///
    /// # Errors
    ///
    /// Returns a repository error; products that no longer exist are skipped
    /// and reported in the result instead.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn restore_stock(
        &self,
        items: &[OrderItem],
    ) -> Result<Vec<SkippedRestore>, StockError> {
        let store = &self.store;
        retry_transient("restore_stock", || async move {
            let mut tx = store.begin().await?;
            let skipped = restore_within(&mut tx, items).await?;
            tx.commit().await?;
            Ok::<_, StockError>(skipped)
        })
        .await
    }
}

/// Decrement stock for `items` inside an existing unit of work.
///
/// On error the unit of work holds partial decrements and must be dropped.
///
/// # Errors
///
/// Returns `InsufficientStock` or `ProductNotFound` for the first product
/// that cannot be decremented.
pub async fn decrement_within<T>(tx: &mut T, items: &[OrderItem]) -> Result<(), StockError>
where
    T: StockStore + ?Sized,
{
    for (product_id, requested) in aggregate_quantities(items) {
        if let Some(remaining) = tx.decrement_stock_if_available(product_id, requested).await? {
            tracing::debug!(product_id = %product_id, requested, remaining, "Stock decremented");
            continue;
        }

        // The conditional update matched nothing: tell missing from short.
        return Err(match tx.find_product(product_id).await? {
            None => StockError::ProductNotFound(product_id),
            Some(product) => StockError::InsufficientStock {
                product_id,
                name: product.name,
                available: product.stock,
                requested,
            },
        });
    }
    Ok(())
}

/// Increment stock for `items` inside an existing unit of work.
///
/// # Errors
///
/// Returns a repository error. Missing products are skipped and returned.
pub async fn restore_within<T>(
    tx: &mut T,
    items: &[OrderItem],
) -> Result<Vec<SkippedRestore>, StockError>
where
    T: StockStore + ?Sized,
{
    let mut skipped = Vec::new();
    for (product_id, quantity) in aggregate_quantities(items) {
        match tx.increment_stock(product_id, quantity).await? {
            Some(stock) => {
                tracing::debug!(product_id = %product_id, quantity, stock, "Stock restored");
            }
            None => skipped.push(SkippedRestore {
                product_id,
                quantity,
            }),
        }
    }
    Ok(skipped)
}
