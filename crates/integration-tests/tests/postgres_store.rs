//! Stock and payment consistency against `PostgreSQL`.
//!
//! These tests require:
//! - A running `PostgreSQL` database
//! - `DATABASE_URL` pointing at it (a `.env` file is read)
//!
//! Migrations are applied on connect. Each test creates its own products, so
//! tests can share one database.
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/shopwright_test \
//!     cargo test -p shopwright-integration-tests --test postgres_store -- --ignored
//! ```

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::future::join_all;
use secrecy::SecretString;
use sqlx::PgPool;

use shopwright_core::{OrderStatus, PaymentStatus, ProductId, UserId};
use shopwright_integration_tests::{
    FakeProvider, app_state, charge_refunded, order_request, session_completed, sign,
};
use shopwright_server::db::{OrderTx, PgStore, StockStore, Store, create_pool};
use shopwright_server::models::EventOutcome;
use shopwright_server::state::AppState;

static NEXT_PRODUCT: AtomicU32 = AtomicU32::new(0);

async fn connect() -> PgPool {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = create_pool(&SecretString::from(url)).await.unwrap();
    sqlx::migrate!("../server/migrations").run(&pool).await.unwrap();
    pool
}

async fn state() -> (PgPool, AppState<PgStore>) {
    let pool = connect().await;
    let state = app_state(PgStore::new(pool.clone()), Arc::new(FakeProvider::default()));
    (pool, state)
}

/// Insert a product with a name no other run uses.
async fn product(pool: &PgPool, name: &str, stock: i32) -> ProductId {
    let name = format!(
        "{name} {}-{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_micros(),
        NEXT_PRODUCT.fetch_add(1, Ordering::SeqCst)
    );
    let id = sqlx::query_scalar::<_, i32>(
        "INSERT INTO products (name, price, stock) VALUES ($1, 12.50, $2) RETURNING id",
    )
    .bind(name)
    .bind(stock)
    .fetch_one(pool)
    .await
    .unwrap();
    ProductId::new(id)
}

async fn stock(pool: &PgPool, id: ProductId) -> i32 {
    sqlx::query_scalar::<_, i32>("SELECT stock FROM products WHERE id = $1")
        .bind(id.as_i32())
        .fetch_one(pool)
        .await
        .unwrap()
}

fn unique_event(prefix: &str) -> String {
    format!(
        "evt_{prefix}_{}_{}",
        chrono::Utc::now().timestamp_micros(),
        NEXT_PRODUCT.fetch_add(1, Ordering::SeqCst)
    )
}

// =============================================================================
// Conditional decrement
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "Requires running database"]
async fn test_concurrent_decrements_never_oversell() {
    let pool = connect().await;
    let store = PgStore::new(pool.clone());
    let id = product(&pool, "Brass lamp", 5).await;

    let attempts = (0..20).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            let mut tx = store.begin().await.unwrap();
            let remaining = tx.decrement_stock_if_available(id, 1).await.unwrap();
            tx.commit().await.unwrap();
            remaining
        })
    });
    let results: Vec<Option<i32>> = join_all(attempts)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_some()).count(), 5);
    let mut remaining: Vec<i32> = results.into_iter().flatten().collect();
    remaining.sort_unstable();
    assert_eq!(remaining, vec![0, 1, 2, 3, 4]);
    assert_eq!(stock(&pool, id).await, 0);
}

#[tokio::test]
#[ignore = "Requires running database"]
async fn test_short_decrement_leaves_stock_untouched() {
    let pool = connect().await;
    let store = PgStore::new(pool.clone());
    let id = product(&pool, "Copper kettle", 2).await;

    let mut tx = store.begin().await.unwrap();
    assert_eq!(tx.decrement_stock_if_available(id, 3).await.unwrap(), None);
    assert_eq!(
        tx.decrement_stock_if_available(ProductId::new(i32::MAX), 1)
            .await
            .unwrap(),
        None
    );
    tx.commit().await.unwrap();

    assert_eq!(stock(&pool, id).await, 2);
}

#[tokio::test]
#[ignore = "Requires running database"]
async fn test_dropped_unit_of_work_rolls_back() {
    let pool = connect().await;
    let store = PgStore::new(pool.clone());
    let first = product(&pool, "Linen towel", 4).await;
    let second = product(&pool, "Cotton towel", 0).await;

    {
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.decrement_stock_if_available(first, 2).await.unwrap(), Some(2));
        assert_eq!(tx.decrement_stock_if_available(second, 1).await.unwrap(), None);
    }

    assert_eq!(stock(&pool, first).await, 4);
}

// =============================================================================
// Settlement races
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "Requires running database"]
async fn test_two_orders_race_for_last_units() {
    let (pool, state) = state().await;
    let id = product(&pool, "Walnut stool", 5).await;

    let mut orders = Vec::new();
    for user in ["ana", "ben"] {
        let order = state
            .orders()
            .create_order(&UserId::parse(user).unwrap(), &order_request(&[(id, 3)]))
            .await
            .unwrap();
        orders.push(order.id);
    }
    assert_eq!(stock(&pool, id).await, 5);

    let deliveries = orders.iter().map(|&order_id| {
        let state = state.clone();
        let (payload, header) = sign(&session_completed(&unique_event("race"), order_id));
        tokio::spawn(async move {
            state
                .payments()
                .handle_event(&payload, Some(&header))
                .await
                .unwrap()
        })
    });
    let mut outcomes: Vec<EventOutcome> = join_all(deliveries)
        .await
        .into_iter()
        .map(|ack| ack.unwrap().outcome.unwrap())
        .collect();
    outcomes.sort_by_key(|outcome| outcome.as_str());

    assert_eq!(
        outcomes,
        vec![EventOutcome::Applied, EventOutcome::StockUnavailable]
    );
    assert_eq!(stock(&pool, id).await, 2);

    let mut paid = 0;
    for order_id in orders {
        let order = state.store().find_order(order_id).await.unwrap().unwrap();
        if order.payment_status == PaymentStatus::Paid {
            paid += 1;
            assert_eq!(order.order_status, OrderStatus::Confirmed);
        } else {
            assert_eq!(order.order_status, OrderStatus::Pending);
        }
    }
    assert_eq!(paid, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "Requires running database"]
async fn test_concurrent_redelivery_applies_once() {
    let (pool, state) = state().await;
    let id = product(&pool, "Oak tray", 10).await;
    let order = state
        .orders()
        .create_order(&UserId::parse("cara").unwrap(), &order_request(&[(id, 2)]))
        .await
        .unwrap();
    let event_id = unique_event("redelivery");
    let (payload, header) = sign(&session_completed(&event_id, order.id));

    let deliveries = (0..8).map(|_| {
        let state = state.clone();
        let payload = payload.clone();
        let header = header.clone();
        tokio::spawn(async move {
            state
                .payments()
                .handle_event(&payload, Some(&header))
                .await
                .unwrap()
        })
    });
    let acks: Vec<_> = join_all(deliveries)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let applied = acks
        .iter()
        .filter(|ack| ack.outcome == Some(EventOutcome::Applied))
        .count();
    assert_eq!(applied, 1);
    assert_eq!(acks.iter().filter(|ack| ack.duplicate).count(), 7);
    assert_eq!(stock(&pool, id).await, 8);

    let record = state
        .store()
        .find_payment_event(&event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.outcome, EventOutcome::Applied);
    assert_eq!(record.order_id, Some(order.id));
}

#[tokio::test]
#[ignore = "Requires running database"]
async fn test_refund_restores_stock_once() {
    let (pool, state) = state().await;
    let id = product(&pool, "Clay mug", 6).await;
    let order = state
        .orders()
        .create_order(&UserId::parse("dev").unwrap(), &order_request(&[(id, 2)]))
        .await
        .unwrap();
    let (payload, header) = sign(&session_completed(&unique_event("paid"), order.id));
    state
        .payments()
        .handle_event(&payload, Some(&header))
        .await
        .unwrap();
    assert_eq!(stock(&pool, id).await, 4);

    let (payload, header) = sign(&charge_refunded(&unique_event("refund"), order.id, 2500));
    let first = state
        .payments()
        .handle_event(&payload, Some(&header))
        .await
        .unwrap();
    let second = state
        .payments()
        .handle_event(&payload, Some(&header))
        .await
        .unwrap();

    assert_eq!(first.outcome, Some(EventOutcome::Refunded));
    assert!(second.duplicate);
    assert_eq!(stock(&pool, id).await, 6);
}

// =============================================================================
// Event ledger
// =============================================================================

#[tokio::test]
#[ignore = "Requires running database"]
async fn test_malformed_event_recorded_without_order() {
    let (_pool, state) = state().await;
    let event_id = unique_event("malformed");
    let (payload, header) = sign(&serde_json::json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": { "id": "cs_missing_status" } }
    }));

    let first = state
        .payments()
        .handle_event(&payload, Some(&header))
        .await
        .unwrap();
    let second = state
        .payments()
        .handle_event(&payload, Some(&header))
        .await
        .unwrap();

    assert_eq!(first.outcome, Some(EventOutcome::Malformed));
    assert!(second.duplicate);
    let record = state
        .store()
        .find_payment_event(&event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.outcome, EventOutcome::Malformed);
    assert_eq!(record.order_id, None);
}
