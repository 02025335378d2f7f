//! `PostgreSQL` implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use shopwright_core::{
    AddressId, OrderId, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, ProductId, UserId,
};

use super::{OrderTx, RepositoryError, StockStore, Store};
use crate::models::{
    Address, DailySales, EventOutcome, NewAddress, NewOrder, NewPaymentEvent, Order, OrderFilter,
    PaymentEventRecord, Product,
};

const PRODUCT_COLUMNS: &str = "id, name, price, image, stock";
const ORDER_COLUMNS: &str = "id, user_id, items, address_id, order_status, payment_status, \
                             payment_method, created_at, updated_at";

/// Store backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for shutdown.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// A `PostgreSQL` transaction. Rolled back by sqlx when dropped uncommitted.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    items: Json<Vec<OrderItem>>,
    address_id: AddressId,
    order_status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: PaymentMethod,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            items: row.items.0,
            address_id: row.address_id,
            order_status: row.order_status,
            payment_status: row.payment_status,
            payment_method: row.payment_method,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentEventRow {
    event_id: String,
    event_type: String,
    order_id: Option<OrderId>,
    outcome: String,
    processed_at: DateTime<Utc>,
}

impl TryFrom<PaymentEventRow> for PaymentEventRecord {
    type Error = RepositoryError;

    fn try_from(row: PaymentEventRow) -> Result<Self, Self::Error> {
        let outcome = row
            .outcome
            .parse::<EventOutcome>()
            .map_err(RepositoryError::DataCorruption)?;
        Ok(Self {
            event_id: row.event_id,
            event_type: row.event_type,
            order_id: row.order_id,
            outcome,
            processed_at: row.processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DailySalesRow {
    date: NaiveDate,
    total_sales: Decimal,
    order_count: i64,
}

/// Stock quantities are `INTEGER` columns.
fn quantity_param(quantity: u32) -> Result<i32, RepositoryError> {
    i32::try_from(quantity)
        .map_err(|_| RepositoryError::DataCorruption(format!("quantity out of range: {quantity}")))
}

fn ids_param<T: Copy + Into<i32>>(ids: &[T]) -> Vec<i32> {
    ids.iter().map(|&id| id.into()).collect()
}

#[async_trait]
impl StockStore for PgTx {
    async fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let product =
            sqlx::query_as::<_, Product>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(product)
    }

    async fn decrement_stock_if_available(
        &mut self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<i32>, RepositoryError> {
        let quantity = quantity_param(quantity)?;
        let remaining = sqlx::query_scalar::<_, i32>(
            r"
            UPDATE products
            SET stock = stock - $2, updated_at = NOW()
            WHERE id = $1 AND stock >= $2
            RETURNING stock
            ",
        )
        .bind(id)
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(remaining)
    }

    async fn increment_stock(
        &mut self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<i32>, RepositoryError> {
        let quantity = quantity_param(quantity)?;
        let stock = sqlx::query_scalar::<_, i32>(
            r"
            UPDATE products
            SET stock = stock + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING stock
            ",
        )
        .bind(id)
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(stock)
    }
}

#[async_trait]
impl OrderTx for PgTx {
    async fn insert_address(&mut self, address: &NewAddress) -> Result<Address, RepositoryError> {
        let address = sqlx::query_as::<_, Address>(
            r"
            INSERT INTO addresses (line_1, line_2, city, phone)
            VALUES ($1, $2, $3, $4)
            RETURNING id, line_1, line_2, city, phone, created_at
            ",
        )
        .bind(&address.line_1)
        .bind(&address.line_2)
        .bind(&address.city)
        .bind(&address.phone)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(address)
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            INSERT INTO orders (user_id, items, address_id, payment_method)
            VALUES ($1, $2, $3, $4)
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(&order.user_id)
        .bind(Json(&order.items))
        .bind(order.address_id)
        .bind(order.payment_method)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Order::from))
    }

    async fn set_order_status(
        &mut self,
        id: OrderId,
        order_status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            UPDATE orders
            SET order_status = $2, payment_status = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(id)
        .bind(order_status)
        .bind(payment_status)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        Ok(row.into())
    }

    async fn record_payment_event(
        &mut self,
        event: &NewPaymentEvent,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            INSERT INTO payment_events (event_id, event_type, order_id, outcome)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(event.order_id)
        .bind(event.outcome.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let product =
            sqlx::query_as::<_, Product>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(product)
    }

    async fn find_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids_param(ids))
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Order::from))
    }

    async fn find_addresses(&self, ids: &[AddressId]) -> Result<Vec<Address>, RepositoryError> {
        let addresses = sqlx::query_as::<_, Address>(
            r"
            SELECT id, line_1, line_2, city, phone, created_at
            FROM addresses
            WHERE id = ANY($1)
            ",
        )
        .bind(ids_param(ids))
        .fetch_all(&self.pool)
        .await?;
        Ok(addresses)
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE ($1::text IS NULL OR user_id = $1)
            ORDER BY created_at DESC, id DESC
            "
        ))
        .bind(filter.user_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Order::from).collect())
    }

    async fn find_payment_event(
        &self,
        event_id: &str,
    ) -> Result<Option<PaymentEventRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, PaymentEventRow>(
            r"
            SELECT event_id, event_type, order_id, outcome, processed_at
            FROM payment_events
            WHERE event_id = $1
            ",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentEventRecord::try_from).transpose()
    }

    async fn daily_sales(&self, since: DateTime<Utc>) -> Result<Vec<DailySales>, RepositoryError> {
        // Line totals use the current catalog price; removed products count as zero.
        let rows = sqlx::query_as::<_, DailySalesRow>(
            r"
            SELECT
                (o.created_at AT TIME ZONE 'UTC')::date AS date,
                COALESCE(SUM(p.price * (item->>'quantity')::int), 0)::numeric AS total_sales,
                COUNT(DISTINCT o.id) AS order_count
            FROM orders o
            CROSS JOIN LATERAL jsonb_array_elements(o.items) AS item
            LEFT JOIN products p ON p.id = (item->>'productId')::int
            WHERE o.payment_status = 'PAID'
              AND o.order_status <> 'CANCELLED'
              AND o.created_at >= $1
            GROUP BY 1
            ORDER BY 1
            ",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DailySales {
                date: row.date,
                total_sales: row.total_sales,
                order_count: row.order_count,
            })
            .collect())
    }
}
