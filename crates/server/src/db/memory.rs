//! In-process implementation of the store traits.
//!
//! Used by tests and local demos. A unit of work takes the store lock and
//! stages its writes on a copy of the state; commit swaps the copy in, drop
//! discards it. Units of work are therefore serialized, which gives the same
//! guarantees the Postgres implementation gets from row locks and conditional
//! updates.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use shopwright_core::{AddressId, OrderId, OrderStatus, PaymentStatus, ProductId};

use super::{OrderTx, RepositoryError, StockStore, Store};
use crate::models::{
    Address, DailySales, NewAddress, NewOrder, NewPaymentEvent, Order, OrderFilter,
    PaymentEventRecord, Product,
};

#[derive(Debug, Clone, Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    addresses: BTreeMap<AddressId, Address>,
    orders: BTreeMap<OrderId, Order>,
    payment_events: HashMap<String, PaymentEventRecord>,
    last_id: i32,
}

impl State {
    const fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }
}

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a catalog product.
    pub async fn insert_product(&self, name: &str, price: Decimal, stock: i32) -> Product {
        let mut state = self.state.lock().await;
        let product = Product {
            id: ProductId::new(state.next_id()),
            name: name.to_string(),
            price,
            image: None,
            stock,
        };
        state.products.insert(product.id, product.clone());
        product
    }

    /// Remove a product from the catalog.
    pub async fn remove_product(&self, id: ProductId) -> Option<Product> {
        self.state.lock().await.products.remove(&id)
    }

    /// Current stock of a product.
    pub async fn stock_of(&self, id: ProductId) -> Option<i32> {
        self.state.lock().await.products.get(&id).map(|p| p.stock)
    }

    /// Number of recorded payment events.
    pub async fn payment_event_count(&self) -> usize {
        self.state.lock().await.payment_events.len()
    }

    /// Make every operation fail with [`RepositoryError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl StockStore for MemoryTx {
    async fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.staged.products.get(&id).cloned())
    }

    async fn decrement_stock_if_available(
        &mut self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<i32>, RepositoryError> {
        let Ok(quantity) = i32::try_from(quantity) else {
            return Ok(None);
        };
        Ok(self.staged.products.get_mut(&id).and_then(|product| {
            (product.stock >= quantity).then(|| {
                product.stock -= quantity;
                product.stock
            })
        }))
    }

    async fn increment_stock(
        &mut self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<i32>, RepositoryError> {
        let quantity = i32::try_from(quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!("quantity out of range: {quantity}"))
        })?;
        match self.staged.products.get_mut(&id) {
            Some(product) => {
                product.stock = product.stock.checked_add(quantity).ok_or_else(|| {
                    RepositoryError::DataCorruption(format!("stock overflow for product {id}"))
                })?;
                Ok(Some(product.stock))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OrderTx for MemoryTx {
    async fn insert_address(&mut self, address: &NewAddress) -> Result<Address, RepositoryError> {
        let address = Address {
            id: AddressId::new(self.staged.next_id()),
            line_1: address.line_1.clone(),
            line_2: address.line_2.clone(),
            city: address.city.clone(),
            phone: address.phone.clone(),
            created_at: Utc::now(),
        };
        self.staged.addresses.insert(address.id, address.clone());
        Ok(address)
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, RepositoryError> {
        let now = Utc::now();
        let order = Order {
            id: OrderId::new(self.staged.next_id()),
            user_id: order.user_id.clone(),
            items: order.items.clone(),
            address_id: order.address_id,
            order_status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: order.payment_method,
            created_at: now,
            updated_at: now,
        };
        self.staged.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.staged.orders.get(&id).cloned())
    }

    async fn set_order_status(
        &mut self,
        id: OrderId,
        order_status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<Order, RepositoryError> {
        let order = self
            .staged
            .orders
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        order.order_status = order_status;
        order.payment_status = payment_status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn record_payment_event(
        &mut self,
        event: &NewPaymentEvent,
    ) -> Result<bool, RepositoryError> {
        if self.staged.payment_events.contains_key(&event.event_id) {
            return Ok(false);
        }
        self.staged.payment_events.insert(
            event.event_id.clone(),
            PaymentEventRecord {
                event_id: event.event_id.clone(),
                event_type: event.event_type.clone(),
                order_id: event.order_id,
                outcome: event.outcome,
                processed_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        let Self { mut guard, staged } = self;
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, RepositoryError> {
        self.check_available()?;
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTx { guard, staged })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check_available()
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        self.check_available()?;
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn find_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .products
            .values()
            .filter(|product| ids.contains(&product.id))
            .cloned()
            .collect())
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        self.check_available()?;
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn find_addresses(&self, ids: &[AddressId]) -> Result<Vec<Address>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.addresses.get(id).cloned())
            .collect())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| {
                filter
                    .user_id
                    .as_ref()
                    .is_none_or(|user_id| &order.user_id == user_id)
            })
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn find_payment_event(
        &self,
        event_id: &str,
    ) -> Result<Option<PaymentEventRecord>, RepositoryError> {
        self.check_available()?;
        Ok(self.state.lock().await.payment_events.get(event_id).cloned())
    }

    async fn daily_sales(&self, since: DateTime<Utc>) -> Result<Vec<DailySales>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut days: BTreeMap<_, DailySales> = BTreeMap::new();

        for order in state.orders.values().filter(|order| {
            order.holds_stock() && order.created_at >= since
        }) {
            let total: Decimal = order
                .items
                .iter()
                .filter_map(|item| {
                    state
                        .products
                        .get(&item.product_id)
                        .map(|product| product.price * Decimal::from(item.quantity))
                })
                .sum();
            let date = order.created_at.date_naive();
            let day = days.entry(date).or_insert_with(|| DailySales {
                date,
                total_sales: Decimal::ZERO,
                order_count: 0,
            });
            day.total_sales += total;
            day.order_count += 1;
        }

        Ok(days.into_values().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let product = store.insert_product("Mug", Decimal::new(1000, 2), 4).await;

        {
            let mut tx = store.begin().await.unwrap();
            assert_eq!(
                tx.decrement_stock_if_available(product.id, 3).await.unwrap(),
                Some(1)
            );
        }

        assert_eq!(store.stock_of(product.id).await, Some(4));
    }

    #[tokio::test]
    async fn test_committed_transaction_is_visible() {
        let store = MemoryStore::new();
        let product = store.insert_product("Mug", Decimal::new(1000, 2), 4).await;

        let mut tx = store.begin().await.unwrap();
        tx.decrement_stock_if_available(product.id, 3).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.stock_of(product.id).await, Some(1));
    }

    #[tokio::test]
    async fn test_conditional_decrement_refuses_short_stock() {
        let store = MemoryStore::new();
        let product = store.insert_product("Mug", Decimal::new(1000, 2), 2).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.decrement_stock_if_available(product.id, 3).await.unwrap(), None);
        assert_eq!(
            tx.decrement_stock_if_available(ProductId::new(999), 1).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_payment_event_recorded_once() {
        let store = MemoryStore::new();
        let event = NewPaymentEvent {
            event_id: "evt_1".to_string(),
            event_type: "checkout.session.completed".to_string(),
            order_id: None,
            outcome: crate::models::EventOutcome::Ignored,
        };

        let mut tx = store.begin().await.unwrap();
        assert!(tx.record_payment_event(&event).await.unwrap());
        assert!(!tx.record_payment_event(&event).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.payment_event_count().await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_fast() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.ping().await, Err(RepositoryError::Unavailable(_))));
        assert!(store.begin().await.is_err());
    }
}
