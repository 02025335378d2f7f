//! Ledger of handled payment-provider events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopwright_core::OrderId;

/// What handling an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// Payment applied: stock decremented and order confirmed.
    Applied,
    /// The order was already paid; nothing changed.
    AlreadyPaid,
    /// The correlated order does not exist.
    OrderNotFound,
    /// The order was charged but stock ran out; left unpaid for manual review.
    StockUnavailable,
    /// Payment arrived for a cancelled order; marked paid, stays cancelled.
    PaidCancelledOrder,
    /// Full refund applied.
    Refunded,
    /// Recognized event that required no change.
    Ignored,
    /// Authenticated event whose payload could not be read; needs review.
    Malformed,
}

impl EventOutcome {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyPaid => "already_paid",
            Self::OrderNotFound => "order_not_found",
            Self::StockUnavailable => "stock_unavailable",
            Self::PaidCancelledOrder => "paid_cancelled_order",
            Self::Refunded => "refunded",
            Self::Ignored => "ignored",
            Self::Malformed => "malformed",
        }
    }
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(Self::Applied),
            "already_paid" => Ok(Self::AlreadyPaid),
            "order_not_found" => Ok(Self::OrderNotFound),
            "stock_unavailable" => Ok(Self::StockUnavailable),
            "paid_cancelled_order" => Ok(Self::PaidCancelledOrder),
            "refunded" => Ok(Self::Refunded),
            "ignored" => Ok(Self::Ignored),
            "malformed" => Ok(Self::Malformed),
            other => Err(format!("unknown event outcome: {other}")),
        }
    }
}

/// A handled event. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEventRecord {
    /// Provider event id, unique.
    pub event_id: String,
    pub event_type: String,
    /// Correlated order, if it could be resolved.
    pub order_id: Option<OrderId>,
    pub outcome: EventOutcome,
    pub processed_at: DateTime<Utc>,
}

/// Event record to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentEvent {
    pub event_id: String,
    pub event_type: String,
    pub order_id: Option<OrderId>,
    pub outcome: EventOutcome,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_strings_round_trip_through_display() {
        for outcome in [
            EventOutcome::Applied,
            EventOutcome::AlreadyPaid,
            EventOutcome::OrderNotFound,
            EventOutcome::StockUnavailable,
            EventOutcome::PaidCancelledOrder,
            EventOutcome::Refunded,
            EventOutcome::Ignored,
        ] {
            assert_eq!(outcome.to_string().parse::<EventOutcome>().unwrap(), outcome);
        }
        assert!("bogus".parse::<EventOutcome>().is_err());
    }
}
