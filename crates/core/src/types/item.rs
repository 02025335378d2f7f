//! Order line items.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ProductId;

/// A product reference and quantity within an order.
///
/// Orders store references only; product names and prices are joined in at
/// read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Referenced catalog product.
    pub product_id: ProductId,
    /// Number of units, always positive.
    pub quantity: u32,
}

impl OrderItem {
    /// Create a new order item.
    #[must_use]
    pub const fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Sum quantities per product, ordered by ascending product id.
///
/// Stock mutations walk this map so that every transaction touches product
/// rows in the same order.
#[must_use]
pub fn aggregate_quantities(items: &[OrderItem]) -> BTreeMap<ProductId, u32> {
    let mut totals = BTreeMap::new();
    for item in items {
        let entry = totals.entry(item.product_id).or_insert(0_u32);
        *entry = entry.saturating_add(item.quantity);
    }
    totals
}
