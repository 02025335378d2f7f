//! Payment provider client.
//!
//! [`PaymentProvider`] is the seam the checkout orchestrator talks to;
//! [`StripeClient`] implements it against the Stripe REST API with
//! form-encoded requests and a bounded timeout.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use shopwright_core::{CurrencyCode, OrderId};

use crate::config::StripeConfig;

/// Metadata key correlating provider objects with orders.
pub const ORDER_ID_METADATA_KEY: &str = "orderId";

/// Errors from payment provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The call did not complete in time. The provider may still have
    /// acted on it.
    #[error("payment provider request timed out")]
    Timeout,

    /// HTTP request failed.
    #[error("payment provider request failed: {0}")]
    Request(String),

    /// The provider answered with an error status.
    #[error("payment provider error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("payment provider response error: {0}")]
    Response(String),
}

impl ProviderError {
    fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// One priced line of a checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub name: String,
    pub image: Option<String>,
    /// Unit price in the currency's minor unit.
    pub unit_amount: i64,
    pub quantity: u32,
}

/// Request for a hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub order_id: OrderId,
    pub currency: CurrencyCode,
    pub line_items: Vec<CheckoutLineItem>,
    /// Where the provider sends the customer afterwards. May contain the
    /// provider's `{CHECKOUT_SESSION_ID}` template.
    pub return_url: String,
}

/// A created checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Handle the embedded checkout widget is mounted with.
    pub client_secret: Option<String>,
    /// Hosted checkout URL, when not embedded.
    #[serde(default)]
    pub url: Option<String>,
}

/// Current state of a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionStatus {
    pub id: String,
    /// `open`, `complete` or `expired`.
    pub status: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: String,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

impl SessionStatus {
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }

    /// Raw order reference from the session metadata.
    #[must_use]
    pub fn order_reference(&self) -> Option<&str> {
        self.metadata.get(ORDER_ID_METADATA_KEY).map(String::as_str)
    }

    #[must_use]
    pub fn customer_email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|details| details.email.as_deref())
    }
}

/// Operations the checkout flow needs from the payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync + 'static {
    /// Create an embedded checkout session.
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError>;

    /// Fetch the current state of a checkout session.
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, ProviderError>;
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Stripe REST API client.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    api_base: Url,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("secret_key", &"[REDACTED]")
            .field("api_base", &self.api_base.as_str())
            .finish_non_exhaustive()
    }
}

impl StripeClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Request` if the HTTP client cannot be built.
    pub fn new(config: &StripeConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.api_base
            .join(path)
            .map_err(|e| ProviderError::Request(e.to_string()))
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| "unknown error".to_string());
            warn!(status = status.as_u16(), %message, "Payment provider API error");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))
    }
}

/// Form fields for a checkout session request.
fn session_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let order_id = request.order_id.to_string();
    let mut form = vec![
        ("ui_mode".to_string(), "embedded".to_string()),
        ("mode".to_string(), "payment".to_string()),
        ("return_url".to_string(), request.return_url.clone()),
        ("client_reference_id".to_string(), order_id.clone()),
        (format!("metadata[{ORDER_ID_METADATA_KEY}]"), order_id.clone()),
        (
            format!("payment_intent_data[metadata][{ORDER_ID_METADATA_KEY}]"),
            order_id,
        ),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((
            format!("{prefix}[price_data][currency]"),
            request.currency.provider_code().to_string(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.name.clone(),
        ));
        if let Some(image) = &item.image {
            form.push((
                format!("{prefix}[price_data][product_data][images][0]"),
                image.clone(),
            ));
        }
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_amount.to_string(),
        ));
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }
    form
}

#[async_trait]
impl PaymentProvider for StripeClient {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, items = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let response = self
            .client
            .post(self.endpoint("/v1/checkout/sessions")?)
            .bearer_auth(self.secret_key.expose_secret())
            .form(&session_form(request))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let session: CheckoutSession = Self::read(response).await?;
        debug!(session_id = %session.id, "Checkout session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, ProviderError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/v1/checkout/sessions/{session_id}"))?)
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        Self::read(response).await
    }
}

// =============================================================================
// Webhook event payloads
// =============================================================================

/// Envelope of a webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// The `checkout.session` object carried by checkout events.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub payment_status: String,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionObject {
    /// Order reference from metadata, falling back to the client reference.
    #[must_use]
    pub fn order_reference(&self) -> Option<&str> {
        self.metadata
            .get(ORDER_ID_METADATA_KEY)
            .map(String::as_str)
            .or(self.client_reference_id.as_deref())
    }
}

/// The `charge` object carried by refund events.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeObject {
    pub id: String,
    pub amount: i64,
    pub amount_refunded: i64,
    #[serde(default)]
    pub refunded: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ChargeObject {
    /// Whether the whole charge has been refunded.
    #[must_use]
    pub const fn is_full_refund(&self) -> bool {
        self.refunded || (self.amount > 0 && self.amount_refunded >= self.amount)
    }

    #[must_use]
    pub fn order_reference(&self) -> Option<&str> {
        self.metadata.get(ORDER_ID_METADATA_KEY).map(String::as_str)
    }
}
