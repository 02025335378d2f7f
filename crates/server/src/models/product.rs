//! Catalog product, as seen by the stock ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shopwright_core::{CurrencyCode, Price, ProductId};

/// A catalog product.
///
/// Products are created and deleted by catalog management; this service only
/// reads them and mutates `stock` through the stock ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    /// Unique product ID.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Unit price in the store currency's standard unit.
    pub price: Decimal,
    /// Optional image URL.
    pub image: Option<String>,
    /// Units available for sale, never negative.
    pub stock: i32,
}

impl Product {
    /// Unit price tagged with the store currency.
    #[must_use]
    pub const fn unit_price(&self, currency: CurrencyCode) -> Price {
        Price::new(self.price, currency)
    }
}
