//! Order records and their read-side views.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shopwright_core::{
    AddressId, OrderId, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, ProductId, UserId,
};

use super::Address;

/// A stored order.
///
/// The record is normalized: items reference products by id only. Product
/// details are joined in by [`OrderView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Unique order ID.
    pub id: OrderId,
    /// Owning user, as issued by the identity provider.
    pub user_id: UserId,
    /// Ordered line items, never empty.
    pub items: Vec<OrderItem>,
    /// Shipping address captured at creation time.
    pub address_id: AddressId,
    /// Fulfillment status.
    pub order_status: OrderStatus,
    /// Payment status.
    pub payment_status: PaymentStatus,
    /// How the customer pays.
    pub payment_method: PaymentMethod,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
    /// When the order was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether the order's items are currently taken out of stock.
    ///
    /// Stock is decremented when this turns true and restored when it turns
    /// false, so each order holds stock at most once.
    #[must_use]
    pub fn holds_stock(&self) -> bool {
        holds_stock(self.order_status, self.payment_status)
    }
}

/// Stock-holding predicate for a status pair.
#[must_use]
pub fn holds_stock(order_status: OrderStatus, payment_status: PaymentStatus) -> bool {
    payment_status == PaymentStatus::Paid && order_status != OrderStatus::Cancelled
}

/// Data needed to insert a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub address_id: AddressId,
    pub payment_method: PaymentMethod,
}

/// Listing filter. `user_id: None` lists every user's orders.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub user_id: Option<UserId>,
}

impl OrderFilter {
    /// Orders of a single user.
    #[must_use]
    pub const fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    /// Every order.
    #[must_use]
    pub const fn all() -> Self {
        Self { user_id: None }
    }
}

/// Product details embedded in an order view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub image: Option<String>,
}

/// A line item joined with its product.
///
/// `product` is `None` when the product has since been removed from the
/// catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemView {
    pub product_id: ProductId,
    pub quantity: u32,
    pub product: Option<ProductSnapshot>,
}

/// Composed read model: an order with product snapshots and its address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderItemView>,
    pub shipping_address: Option<Address>,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Revenue of paid orders created on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySales {
    pub date: NaiveDate,
    pub total_sales: Decimal,
    pub order_count: i64,
}
