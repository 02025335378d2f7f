//! Checkout session orchestration.
//!
//! Creating a session only reads local state and calls the provider; stock
//! and order state change when the payment is confirmed, either by webhook or
//! by the reconciliation in [`CheckoutService::get_session_status`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use shopwright_core::{CurrencyCode, OrderId, OrderStatus, PaymentStatus, PriceError};

use crate::db::{RepositoryError, Store};
use crate::identity::AuthUser;
use crate::inventory::{StockError, StockLedger};
use crate::payments::settlement::{self, EventRef};
use crate::payments::{
    CheckoutLineItem, CheckoutSessionRequest, PaymentProvider, ProviderError,
};

/// Event type recorded for payments applied by reconciliation.
pub const RECONCILED_EVENT_TYPE: &str = "checkout.session.reconciled";

const MAX_SESSION_ID_LEN: usize = 255;

/// Errors from checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("not allowed to access order {0}")]
    Forbidden(OrderId),

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error("invalid price: {0}")]
    Price(#[from] PriceError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Handle returned to the client to mount the embedded checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutHandle {
    pub session_id: String,
    pub client_secret: String,
}

/// Session state as reported to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusView {
    pub status: Option<String>,
    /// Payment status as reported by the provider.
    pub payment_status: String,
    pub customer_email: Option<String>,
    pub order_id: Option<OrderId>,
    /// Payment status of the local order after reconciliation.
    pub order_payment_status: Option<PaymentStatus>,
}

/// Builds checkout sessions and reconciles their outcome.
pub struct CheckoutService<S> {
    store: S,
    ledger: StockLedger<S>,
    provider: Arc<dyn PaymentProvider>,
    currency: CurrencyCode,
    frontend_url: Url,
}

impl<S: Clone> Clone for CheckoutService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            provider: Arc::clone(&self.provider),
            currency: self.currency,
            frontend_url: self.frontend_url.clone(),
        }
    }
}

impl<S> std::fmt::Debug for CheckoutService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutService")
            .field("currency", &self.currency)
            .field("frontend_url", &self.frontend_url.as_str())
            .finish_non_exhaustive()
    }
}

impl<S: Store> CheckoutService<S> {
    #[must_use]
    pub fn new(
        store: S,
        provider: Arc<dyn PaymentProvider>,
        currency: CurrencyCode,
        frontend_url: Url,
    ) -> Self {
        Self {
            ledger: StockLedger::new(store.clone()),
            store,
            provider,
            currency,
            frontend_url,
        }
    }

    /// Create a provider checkout session for an unpaid order.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the order or one of its products is gone,
    /// `Forbidden` for another user's order, `Validation` for orders that
    /// cannot be paid, `Stock` when an item is short, or a provider error.
    #[instrument(skip(self, requester), fields(order_id = %order_id))]
    pub async fn create_checkout_session(
        &self,
        order_id: OrderId,
        requester: &AuthUser,
    ) -> Result<CheckoutHandle, CheckoutError> {
        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("order {order_id}")))?;
        if !requester.can_access(&order.user_id) {
            warn!(target: "security", requester = %requester.user_id, "Checkout for foreign order denied");
            return Err(CheckoutError::Forbidden(order_id));
        }
        if order.payment_status != PaymentStatus::Pending {
            return Err(CheckoutError::Validation(format!(
                "order {order_id} is already {}",
                order.payment_status.as_str().to_lowercase()
            )));
        }
        if order.order_status == OrderStatus::Cancelled {
            return Err(CheckoutError::Validation(format!(
                "order {order_id} is cancelled"
            )));
        }

        let ids: Vec<_> = order.items.iter().map(|item| item.product_id).collect();
        let products: HashMap<_, _> = self
            .store
            .find_products(&ids)
            .await?
            .into_iter()
            .map(|product| (product.id, product))
            .collect();

        let mut line_items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let product = products
                .get(&item.product_id)
                .ok_or_else(|| CheckoutError::NotFound(format!("product {}", item.product_id)))?;
            line_items.push(CheckoutLineItem {
                name: product.name.clone(),
                image: product.image.clone(),
                unit_amount: product.unit_price(self.currency).to_minor_units()?,
                quantity: item.quantity,
            });
        }

        // Fail early with a clear reason; stock is taken on payment.
        self.ledger.validate_availability(&order.items).await?;

        let session = self
            .provider
            .create_checkout_session(&CheckoutSessionRequest {
                order_id,
                currency: self.currency,
                line_items,
                return_url: self.return_url(order_id),
            })
            .await?;
        let client_secret = session.client_secret.ok_or_else(|| {
            ProviderError::Response("checkout session has no client secret".to_string())
        })?;

        info!(session_id = %session.id, "Checkout session created");
        Ok(CheckoutHandle {
            session_id: session.id,
            client_secret,
        })
    }

    /// Report a session's state and apply its payment if the webhook has not.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed session ids, `Forbidden` when the
    /// session belongs to another user's order, or a provider or repository
    /// error.
    #[instrument(skip(self, requester))]
    pub async fn get_session_status(
        &self,
        session_id: &str,
        requester: &AuthUser,
    ) -> Result<SessionStatusView, CheckoutError> {
        validate_session_id(session_id)?;
        let session = self.provider.retrieve_session(session_id).await?;

        let reference = session.order_reference();
        let order_id = reference.and_then(|r| r.parse::<OrderId>().ok());
        let mut order = match order_id {
            Some(id) => self.store.find_order(id).await?,
            None => None,
        };
        if let Some(order) = &order
            && !requester.can_access(&order.user_id)
        {
            warn!(target: "security", requester = %requester.user_id, order_id = %order.id, "Session status for foreign order denied");
            return Err(CheckoutError::Forbidden(order.id));
        }

        if session.is_paid()
            && order
                .as_ref()
                .is_some_and(|o| o.payment_status == PaymentStatus::Pending)
        {
            let event_id = format!("session:{}", session.id);
            let event = EventRef {
                id: &event_id,
                event_type: RECONCILED_EVENT_TYPE,
            };
            if let Some(settled) = settlement::settle_payment(&self.store, event, reference).await? {
                info!(outcome = %settled.outcome, "Payment reconciled from session status");
                order = settled.order;
            } else if let Some(id) = order_id {
                order = self.store.find_order(id).await?;
            }
        }

        Ok(SessionStatusView {
            status: session.status.clone(),
            payment_status: session.payment_status.clone(),
            customer_email: session.customer_email().map(String::from),
            order_id: order.as_ref().map(|o| o.id),
            order_payment_status: order.map(|o| o.payment_status),
        })
    }

    fn return_url(&self, order_id: OrderId) -> String {
        format!(
            "{}/?payment=success&session_id={{CHECKOUT_SESSION_ID}}&order_id={order_id}",
            self.frontend_url.as_str().trim_end_matches('/')
        )
    }
}

fn validate_session_id(session_id: &str) -> Result<(), CheckoutError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CheckoutError::Validation("invalid session_id".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use shopwright_core::{OrderItem, PaymentMethod, Role, UserId};

    use super::*;
    use crate::db::{MemoryStore, OrderTx};
    use crate::models::{EventOutcome, NewAddress, NewOrder, Order};
    use crate::payments::stripe::{CheckoutSession, SessionStatus};

    #[derive(Default)]
    struct FakeProvider {
        requests: Mutex<Vec<CheckoutSessionRequest>>,
        session: Mutex<Option<SessionStatus>>,
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        async fn create_checkout_session(
            &self,
            request: &CheckoutSessionRequest,
        ) -> Result<CheckoutSession, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(CheckoutSession {
                id: "cs_test_123".to_string(),
                client_secret: Some("cs_test_123_secret".to_string()),
                url: None,
            })
        }

        async fn retrieve_session(&self, _session_id: &str) -> Result<SessionStatus, ProviderError> {
            self.session
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ProviderError::Api {
                    status: 404,
                    message: "No such checkout session".to_string(),
                })
        }
    }

    fn customer(id: &str) -> AuthUser {
        AuthUser {
            user_id: UserId::parse(id).unwrap(),
            name: None,
            role: Role::Customer,
        }
    }

    fn paid_session(order_id: OrderId) -> SessionStatus {
        SessionStatus {
            id: "cs_test_123".to_string(),
            status: Some("complete".to_string()),
            payment_status: "paid".to_string(),
            customer_details: None,
            metadata: HashMap::from([("orderId".to_string(), order_id.to_string())]),
        }
    }

    async fn setup() -> (MemoryStore, Arc<FakeProvider>, CheckoutService<MemoryStore>, Order) {
        let store = MemoryStore::new();
        let product = store
            .insert_product("Notebook", Decimal::new(1999, 2), 4)
            .await;
        let mut tx = store.begin().await.unwrap();
        let address = tx
            .insert_address(&NewAddress {
                line_1: "8 Temple Rd".to_string(),
                line_2: None,
                city: "Jaffna".to_string(),
                phone: "0210000000".to_string(),
            })
            .await
            .unwrap();
        let order = tx
            .insert_order(&NewOrder {
                user_id: UserId::parse("user_1").unwrap(),
                items: vec![OrderItem::new(product.id, 3)],
                address_id: address.id,
                payment_method: PaymentMethod::CreditCard,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let provider = Arc::new(FakeProvider::default());
        let service = CheckoutService::new(
            store.clone(),
            provider.clone(),
            CurrencyCode::USD,
            Url::parse("https://shop.test/").unwrap(),
        );
        (store, provider, service, order)
    }

    #[tokio::test]
    async fn test_create_session_prices_in_minor_units() {
        let (store, provider, service, order) = setup().await;

        let handle = service
            .create_checkout_session(order.id, &customer("user_1"))
            .await
            .unwrap();

        assert_eq!(handle.client_secret, "cs_test_123_secret");
        let requests = provider.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.order_id, order.id);
        assert_eq!(request.line_items[0].unit_amount, 1999);
        assert_eq!(request.line_items[0].quantity, 3);
        assert_eq!(
            request.return_url,
            format!(
                "https://shop.test/?payment=success&session_id={{CHECKOUT_SESSION_ID}}&order_id={}",
                order.id
            )
        );
        drop(requests);
        assert_eq!(store.stock_of(order.items[0].product_id).await, Some(4));
    }

    #[tokio::test]
    async fn test_create_session_checks_ownership_and_products() {
        let (store, _provider, service, order) = setup().await;

        assert!(matches!(
            service.create_checkout_session(order.id, &customer("user_2")).await,
            Err(CheckoutError::Forbidden(_))
        ));
        assert!(matches!(
            service.create_checkout_session(OrderId::new(999), &customer("user_1")).await,
            Err(CheckoutError::NotFound(_))
        ));

        store.remove_product(order.items[0].product_id).await;
        assert!(matches!(
            service.create_checkout_session(order.id, &customer("user_1")).await,
            Err(CheckoutError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_session_rejects_paid_order() {
        let (store, _provider, service, order) = setup().await;
        let mut tx = store.begin().await.unwrap();
        tx.set_order_status(order.id, OrderStatus::Confirmed, PaymentStatus::Paid)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            service.create_checkout_session(order.id, &customer("user_1")).await,
            Err(CheckoutError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_session_status_reconciles_lost_webhook_once() {
        let (store, provider, service, order) = setup().await;
        *provider.session.lock().unwrap() = Some(paid_session(order.id));
        let product = order.items[0].product_id;

        let view = service
            .get_session_status("cs_test_123", &customer("user_1"))
            .await
            .unwrap();
        assert_eq!(view.order_id, Some(order.id));
        assert_eq!(view.order_payment_status, Some(PaymentStatus::Paid));
        assert_eq!(store.stock_of(product).await, Some(1));

        let again = service
            .get_session_status("cs_test_123", &customer("user_1"))
            .await
            .unwrap();
        assert_eq!(again.order_payment_status, Some(PaymentStatus::Paid));
        assert_eq!(store.stock_of(product).await, Some(1));

        let record = store
            .find_payment_event("session:cs_test_123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.outcome, EventOutcome::Applied);
    }

    #[tokio::test]
    async fn test_session_status_validates_and_checks_owner() {
        let (_store, provider, service, order) = setup().await;
        *provider.session.lock().unwrap() = Some(paid_session(order.id));

        assert!(matches!(
            service.get_session_status("cs/../x", &customer("user_1")).await,
            Err(CheckoutError::Validation(_))
        ));
        assert!(matches!(
            service.get_session_status("cs_test_123", &customer("user_2")).await,
            Err(CheckoutError::Forbidden(_))
        ));
    }
}
