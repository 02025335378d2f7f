//! Seed catalog products for local development.
//!
//! ```yaml
//! - name: Ceramic Mug
//!   price: "12.50"
//!   image: https://cdn.example.test/mug.jpg
//!   stock: 40
//! ```
//!
//! Products are upserted by name, so the file can be applied repeatedly.
//! Prices must be exact in the currency's minor unit.

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info};

use shopwright_core::{CurrencyCode, Price};
use shopwright_server::db;

use super::{CommandError, database_url};

/// One product entry in the seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductSeed {
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub image: Option<String>,
    pub stock: i32,
}

/// Problems with the seed entries, one message each.
#[must_use]
pub fn validate(products: &[ProductSeed], currency: CurrencyCode) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (i, product) in products.iter().enumerate() {
        let name = product.name.trim();
        if name.is_empty() {
            errors.push(format!("[{i}] name is required"));
        } else if !seen.insert(name) {
            errors.push(format!("[{i}] {name}: duplicate name"));
        }
        if let Err(e) = Price::new(product.price, currency).to_minor_units() {
            errors.push(format!("[{i}] {name}: {e}"));
        } else if product.price.normalize().scale() > currency.minor_unit_exponent() {
            errors.push(format!(
                "[{i}] {name}: price {} has more decimals than {} allows",
                product.price,
                currency.code()
            ));
        }
        if product.stock < 0 {
            errors.push(format!("[{i}] {name}: stock must not be negative"));
        }
    }
    errors
}

/// Upsert products from a YAML file, or only validate it when `check_only`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, any entry is
/// invalid, or a database operation fails.
pub async fn products(
    file_path: &str,
    currency: CurrencyCode,
    check_only: bool,
) -> Result<(), CommandError> {
    let path = Path::new(file_path);
    info!(path = %file_path, "Loading products from file");

    // Read and validate before connecting to the database
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CommandError::Read {
            path: file_path.to_string(),
            source,
        })?;
    let products: Vec<ProductSeed> = serde_yaml::from_str(&content)?;

    let errors = validate(&products, currency);
    if !errors.is_empty() {
        error!("Product validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(CommandError::Invalid(errors.len()));
    }
    if check_only {
        info!(products = products.len(), "Seed file is valid");
        return Ok(());
    }

    let pool = db::create_pool(&database_url()?).await?;
    info!("Connected to database");

    let mut tx = pool.begin().await?;
    for product in &products {
        sqlx::query(
            r"
            INSERT INTO products (name, price, image, stock)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET price = EXCLUDED.price,
                image = EXCLUDED.image,
                stock = EXCLUDED.stock,
                updated_at = NOW()
            ",
        )
        .bind(product.name.trim())
        .bind(product.price)
        .bind(&product.image)
        .bind(product.stock)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    pool.close().await;
    info!(products = products.len(), "Seeding complete!");
    Ok(())
}
