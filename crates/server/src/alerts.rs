//! Operational alerts for inconsistencies that need a human.
//!
//! Alerts never fail the request that detected them. They are logged at
//! `error` under the `ops_alert` target, which the Sentry tracing layer turns
//! into an event tagged with the alert kind.

use std::fmt;

use shopwright_core::{OrderId, ProductId};

/// Something went wrong that the system cannot resolve by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpsAlert {
    /// A charged order could not take its stock.
    StockUnavailableForPaidOrder {
        order_id: OrderId,
        product_id: ProductId,
        event_id: String,
    },
    /// A payment arrived for an order that was already cancelled.
    PaymentForCancelledOrder { order_id: OrderId, event_id: String },
    /// A payment event references an order that does not exist.
    UnresolvableOrder {
        event_id: String,
        reference: Option<String>,
    },
    /// Stock could not be restored because the product was removed.
    RestoreSkippedMissingProduct {
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    },
    /// A signed event arrived whose payload could not be read.
    MalformedEvent {
        event_id: String,
        event_type: String,
        reason: String,
    },
}

impl OpsAlert {
    /// Short machine-readable kind, used as the Sentry tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StockUnavailableForPaidOrder { .. } => "stock_unavailable_for_paid_order",
            Self::PaymentForCancelledOrder { .. } => "payment_for_cancelled_order",
            Self::UnresolvableOrder { .. } => "unresolvable_order",
            Self::RestoreSkippedMissingProduct { .. } => "restore_skipped_missing_product",
            Self::MalformedEvent { .. } => "malformed_event",
        }
    }
}

impl fmt::Display for OpsAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StockUnavailableForPaidOrder {
                order_id,
                product_id,
                event_id,
            } => write!(
                f,
                "order {order_id} was charged (event {event_id}) but product {product_id} is out of stock; order left unpaid for manual resolution"
            ),
            Self::PaymentForCancelledOrder { order_id, event_id } => write!(
                f,
                "payment received for cancelled order {order_id} (event {event_id}); refund required"
            ),
            Self::UnresolvableOrder {
                event_id,
                reference,
            } => write!(
                f,
                "payment event {event_id} references unknown order {}",
                reference.as_deref().unwrap_or("<missing>")
            ),
            Self::RestoreSkippedMissingProduct {
                order_id,
                product_id,
                quantity,
            } => write!(
                f,
                "could not restore {quantity} unit(s) of removed product {product_id} for order {order_id}"
            ),
            Self::MalformedEvent {
                event_id,
                event_type,
                reason,
            } => write!(
                f,
                "payment event {event_id} ({}) could not be read: {reason}",
                if event_type.is_empty() { "<no type>" } else { event_type }
            ),
        }
    }
}

/// Report an alert to the operational channel.
pub fn raise(alert: &OpsAlert) {
    let kind = alert.kind();
    sentry::with_scope(
        |scope| scope.set_tag("ops_alert", kind),
        || tracing::error!(target: "ops_alert", kind, "{alert}"),
    );
}
