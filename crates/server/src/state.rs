//! Application state shared across handlers.

use std::sync::Arc;

use url::Url;

use shopwright_core::CurrencyCode;

use crate::checkout::CheckoutService;
use crate::config::ServerConfig;
use crate::db::Store;
use crate::identity::TokenVerifier;
use crate::orders::OrderService;
use crate::payments::{PaymentEventProcessor, PaymentProvider, WebhookVerifier};

/// Application state shared across all handlers.
pub struct AppState<S> {
    inner: Arc<AppStateInner<S>>,
}

struct AppStateInner<S> {
    store: S,
    orders: OrderService<S>,
    checkout: CheckoutService<S>,
    payments: PaymentEventProcessor<S>,
    tokens: TokenVerifier,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Store> AppState<S> {
    #[must_use]
    pub fn new(
        store: S,
        provider: Arc<dyn PaymentProvider>,
        tokens: TokenVerifier,
        webhooks: WebhookVerifier,
        currency: CurrencyCode,
        frontend_url: Url,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                orders: OrderService::new(store.clone()),
                checkout: CheckoutService::new(store.clone(), provider, currency, frontend_url),
                payments: PaymentEventProcessor::new(store.clone(), webhooks),
                store,
                tokens,
            }),
        }
    }

    /// Build state from loaded configuration.
    #[must_use]
    pub fn from_config(store: S, provider: Arc<dyn PaymentProvider>, config: &ServerConfig) -> Self {
        Self::new(
            store,
            provider,
            TokenVerifier::new(&config.identity),
            WebhookVerifier::new(
                config.stripe.webhook_secret.clone(),
                config.stripe.webhook_tolerance,
            ),
            config.currency,
            config.frontend_url.clone(),
        )
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    #[must_use]
    pub fn orders(&self) -> &OrderService<S> {
        &self.inner.orders
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService<S> {
        &self.inner.checkout
    }

    #[must_use]
    pub fn payments(&self) -> &PaymentEventProcessor<S> {
        &self.inner.payments
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenVerifier {
        &self.inner.tokens
    }
}
