//! Payment-provider webhook processing.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use shopwright_core::OrderId;

use crate::alerts::{self, OpsAlert};
use crate::db::{RepositoryError, Store};
use crate::models::EventOutcome;

use super::settlement::{self, EventRef, Settlement};
use super::signature::{SignatureError, WebhookVerifier};
use super::stripe::{ChargeObject, CheckoutSessionObject, ProviderEvent};

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_SESSION_ASYNC_PAYMENT_SUCCEEDED: &str =
    "checkout.session.async_payment_succeeded";
pub const CHARGE_REFUNDED: &str = "charge.refunded";

/// Errors from webhook handling.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// Nothing was recorded; the provider should deliver the event again.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Acknowledgement returned to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<EventOutcome>,
    /// The event id had already been handled.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

impl WebhookAck {
    const fn handled(outcome: EventOutcome) -> Self {
        Self {
            received: true,
            outcome: Some(outcome),
            duplicate: false,
        }
    }

    const fn skipped() -> Self {
        Self {
            received: true,
            outcome: None,
            duplicate: false,
        }
    }

    const fn duplicate() -> Self {
        Self {
            received: true,
            outcome: None,
            duplicate: true,
        }
    }

    fn from_settlement(settlement: Option<Settlement>) -> Self {
        settlement.map_or_else(Self::duplicate, |s| Self::handled(s.outcome))
    }
}

/// Verifies, deduplicates and applies provider events.
#[derive(Debug, Clone)]
pub struct PaymentEventProcessor<S> {
    store: S,
    verifier: WebhookVerifier,
}

impl<S: Store> PaymentEventProcessor<S> {
    #[must_use]
    pub const fn new(store: S, verifier: WebhookVerifier) -> Self {
        Self { store, verifier }
    }

    /// Handle one webhook delivery.
    ///
    /// Nothing is read from the payload before its signature is verified.
    /// Event types this service does not act on are acknowledged without
    /// being recorded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` or `InvalidPayload` for deliveries that must
    /// be rejected, and `Repository` when the store fails and the provider
    /// should retry.
    #[instrument(skip(self, payload, signature), fields(event_id, event_type))]
    pub async fn handle_event(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, WebhookError> {
        if let Err(e) = self.verifier.verify(payload, signature) {
            warn!(target: "security", error = %e, "Rejected webhook delivery");
            return Err(e.into());
        }

        let event: ProviderEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => return self.malformed_envelope(payload, e.to_string()).await,
        };
        let span = tracing::Span::current();
        span.record("event_id", event.id.as_str());
        span.record("event_type", event.event_type.as_str());

        if self.store.find_payment_event(&event.id).await?.is_some() {
            debug!("Duplicate event delivery");
            return Ok(WebhookAck::duplicate());
        }

        let event_ref = EventRef {
            id: &event.id,
            event_type: &event.event_type,
        };
        match event.event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED | CHECKOUT_SESSION_ASYNC_PAYMENT_SUCCEEDED => {
                let session: CheckoutSessionObject = match parse_object(&event) {
                    Ok(session) => session,
                    Err(reason) => return self.record_malformed(event_ref, reason).await,
                };
                if session.payment_status != "paid" {
                    // Delayed payment methods complete later with a separate
                    // event.
                    debug!(session_id = %session.id, payment_status = %session.payment_status, "Session not paid yet");
                    return Ok(WebhookAck::skipped());
                }
                let settled =
                    settlement::settle_payment(&self.store, event_ref, session.order_reference())
                        .await?;
                Ok(WebhookAck::from_settlement(settled))
            }
            CHARGE_REFUNDED => {
                let charge: ChargeObject = match parse_object(&event) {
                    Ok(charge) => charge,
                    Err(reason) => return self.record_malformed(event_ref, reason).await,
                };
                if !charge.is_full_refund() {
                    debug!(charge_id = %charge.id, "Partial refund ignored");
                    let order_id = self.existing_order(charge.order_reference()).await?;
                    let recorded = settlement::record_only(
                        &self.store,
                        event_ref,
                        order_id,
                        EventOutcome::Ignored,
                    )
                    .await?;
                    return Ok(if recorded {
                        WebhookAck::handled(EventOutcome::Ignored)
                    } else {
                        WebhookAck::duplicate()
                    });
                }
                let settled =
                    settlement::settle_refund(&self.store, event_ref, charge.order_reference())
                        .await?;
                Ok(WebhookAck::from_settlement(settled))
            }
            other => {
                debug!(event_type = other, "Unhandled event type acknowledged");
                Ok(WebhookAck::skipped())
            }
        }
    }

    /// Handle a verified payload that is not a well-formed event.
    ///
    /// Recorded and acknowledged when it carries an event id, rejected
    /// otherwise.
    async fn malformed_envelope(
        &self,
        payload: &[u8],
        reason: String,
    ) -> Result<WebhookAck, WebhookError> {
        let envelope = serde_json::from_slice::<EventEnvelope>(payload).ok();
        let Some(EventEnvelope {
            id: Some(id),
            event_type,
        }) = envelope.filter(|e| e.id.as_deref().is_some_and(|id| !id.trim().is_empty()))
        else {
            return Err(WebhookError::InvalidPayload(reason));
        };
        let event_type = event_type.unwrap_or_default();
        let span = tracing::Span::current();
        span.record("event_id", id.as_str());
        span.record("event_type", event_type.as_str());

        let event = EventRef {
            id: &id,
            event_type: &event_type,
        };
        self.record_malformed(event, reason).await
    }

    async fn record_malformed(
        &self,
        event: EventRef<'_>,
        reason: String,
    ) -> Result<WebhookAck, WebhookError> {
        warn!(error = %reason, "Verified event has an unexpected shape");
        let recorded =
            settlement::record_only(&self.store, event, None, EventOutcome::Malformed).await?;
        if !recorded {
            return Ok(WebhookAck::duplicate());
        }
        alerts::raise(&OpsAlert::MalformedEvent {
            event_id: event.id.to_string(),
            event_type: event.event_type.to_string(),
            reason,
        });
        Ok(WebhookAck::handled(EventOutcome::Malformed))
    }

    /// Id of the referenced order if it exists.
    async fn existing_order(
        &self,
        reference: Option<&str>,
    ) -> Result<Option<OrderId>, RepositoryError> {
        let Some(id) = reference.and_then(|r| r.trim().parse::<OrderId>().ok()) else {
            return Ok(None);
        };
        Ok(self.store.find_order(id).await?.map(|order| order.id))
    }
}

/// Just enough of an event to record it when the rest does not parse.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    event_type: Option<String>,
}

fn parse_object<T: serde::de::DeserializeOwned>(event: &ProviderEvent) -> Result<T, String> {
    T::deserialize(&event.data.object).map_err(|e| e.to_string())
}
