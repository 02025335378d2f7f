//! Integration test harness for Shopwright.
//!
//! Runs the real services and router against the in-memory store and a fake
//! payment provider, so most scenarios need no database or network. The
//! `postgres_store` tests run the same services against `PostgreSQL` and are
//! ignored by default.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p shopwright-integration-tests
//!
//! # Include the database-backed tests
//! DATABASE_URL=postgres://localhost/shopwright_test \
//!     cargo test -p shopwright-integration-tests -- --include-ignored
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use jsonwebtoken::{EncodingKey, Header, encode};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;

use shopwright_core::{CurrencyCode, OrderId, OrderItem, ProductId, UserId};
use shopwright_server::config::IdentityConfig;
use shopwright_server::db::{MemoryStore, Store};
use shopwright_server::identity::{Claims, ClaimsMetadata, TokenVerifier};
use shopwright_server::models::{NewAddress, OrderView};
use shopwright_server::orders::CreateOrderRequest;
use shopwright_server::payments::signature::signature_header;
use shopwright_server::payments::stripe::{CheckoutSession, SessionStatus};
use shopwright_server::payments::{
    CheckoutSessionRequest, PaymentProvider, ProviderError, WebhookAck, WebhookError,
    WebhookVerifier,
};
use shopwright_server::state::AppState;

pub const WEBHOOK_SECRET: &str = "whsec_zK8fQ2mV7pLx1RcN";
pub const JWT_SECRET: &str = "k9Vq2LmZ7xR4tW8yB1nC6dF3gH5jK0pS";
pub const FRONTEND_URL: &str = "https://shop.test";

/// Payment provider double that keeps sessions in memory.
#[derive(Default)]
pub struct FakeProvider {
    next_id: AtomicU32,
    sessions: Mutex<HashMap<String, SessionStatus>>,
    requests: Mutex<Vec<CheckoutSessionRequest>>,
}

impl FakeProvider {
    /// Mark a session paid, as if the customer completed checkout.
    pub fn complete(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(session_id).unwrap();
        session.status = Some("complete".to_string());
        session.payment_status = "paid".to_string();
    }

    /// Checkout session requests received so far.
    pub fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let id = format!("cs_test_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.requests.lock().unwrap().push(request.clone());
        self.sessions.lock().unwrap().insert(
            id.clone(),
            SessionStatus {
                id: id.clone(),
                status: Some("open".to_string()),
                payment_status: "unpaid".to_string(),
                customer_details: None,
                metadata: HashMap::from([("orderId".to_string(), request.order_id.to_string())]),
            },
        );
        Ok(CheckoutSession {
            client_secret: Some(format!("{id}_secret")),
            id,
            url: None,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, ProviderError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("No such checkout session: {session_id}"),
            })
    }
}

/// Everything a scenario needs.
pub struct TestContext {
    pub store: MemoryStore,
    pub provider: Arc<FakeProvider>,
    pub state: AppState<MemoryStore>,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    #[must_use]
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let provider = Arc::new(FakeProvider::default());
        let state = app_state(store.clone(), provider.clone());
        Self {
            store,
            provider,
            state,
        }
    }

    /// The full HTTP application.
    #[must_use]
    pub fn router(&self) -> Router {
        shopwright_server::app(
            self.state.clone(),
            &[FRONTEND_URL.to_string()],
            Duration::from_secs(5),
        )
    }

    pub async fn product(&self, name: &str, price: &str, stock: i32) -> ProductId {
        self.store
            .insert_product(name, price.parse::<Decimal>().unwrap(), stock)
            .await
            .id
    }

    /// Place an order through the order service.
    pub async fn place_order(&self, user: &str, items: &[(ProductId, u32)]) -> OrderView {
        self.state
            .orders()
            .create_order(&UserId::parse(user).unwrap(), &order_request(items))
            .await
            .unwrap()
    }

    /// Deliver a signed webhook to the processor.
    pub async fn deliver(&self, event: &Value) -> Result<WebhookAck, WebhookError> {
        let (payload, header) = sign(event);
        self.state
            .payments()
            .handle_event(&payload, Some(&header))
            .await
    }

    pub async fn stock(&self, id: ProductId) -> i32 {
        self.store.stock_of(id).await.unwrap()
    }
}

/// Application state over `store`, wired with the test secrets.
#[must_use]
pub fn app_state<S: Store>(store: S, provider: Arc<FakeProvider>) -> AppState<S> {
    let tokens = TokenVerifier::new(&IdentityConfig {
        jwt_secret: SecretString::from(JWT_SECRET),
        issuer: None,
    });
    let webhooks =
        WebhookVerifier::new(SecretString::from(WEBHOOK_SECRET), Duration::from_secs(300));
    AppState::new(
        store,
        provider,
        tokens,
        webhooks,
        CurrencyCode::USD,
        Url::parse(FRONTEND_URL).unwrap(),
    )
}

#[must_use]
pub fn order_request(items: &[(ProductId, u32)]) -> CreateOrderRequest {
    CreateOrderRequest {
        order_items: items
            .iter()
            .map(|&(id, quantity)| OrderItem::new(id, quantity))
            .collect(),
        shipping_address: NewAddress {
            line_1: "42 Galle Rd".to_string(),
            line_2: None,
            city: "Colombo".to_string(),
            phone: "+94 11 234 5678".to_string(),
        },
        payment_method: None,
    }
}

/// Bearer token for `user`.
#[must_use]
pub fn token(user: &str, admin: bool) -> String {
    let claims = Claims {
        sub: user.to_string(),
        name: None,
        metadata: ClaimsMetadata {
            role: admin.then(|| "admin".to_string()),
        },
        exp: chrono::Utc::now().timestamp() + 600,
        iss: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Serialize and sign a webhook event.
#[must_use]
pub fn sign(event: &Value) -> (Vec<u8>, String) {
    let payload = serde_json::to_vec(event).unwrap();
    let header = signature_header(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), &payload);
    (payload, header)
}

/// A `checkout.session.completed` event for `order_id`.
#[must_use]
pub fn session_completed(event_id: &str, order_id: OrderId) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": format!("cs_{event_id}"),
            "payment_status": "paid",
            "client_reference_id": order_id.to_string(),
            "metadata": { "orderId": order_id.to_string() }
        }}
    })
}

/// A full-refund `charge.refunded` event for `order_id`.
#[must_use]
pub fn charge_refunded(event_id: &str, order_id: OrderId, amount: i64) -> Value {
    json!({
        "id": event_id,
        "type": "charge.refunded",
        "data": { "object": {
            "id": format!("ch_{event_id}"),
            "amount": amount,
            "amount_refunded": amount,
            "refunded": true,
            "metadata": { "orderId": order_id.to_string() }
        }}
    })
}
