//! Order state machine.
//!
//! Pure functions deciding whether a status change is allowed and what it
//! does to stock. Stock moves follow [`holds_stock`]: it is decremented when
//! an order starts holding stock and restored when it stops, so every order
//! takes and returns its items at most once.

use thiserror::Error;

use shopwright_core::{OrderStatus, PaymentStatus};

use crate::models::holds_stock;

/// A status change that is not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("order is cancelled and cannot move to {to}")]
    OrderCancelled { to: OrderStatus },

    #[error("order status cannot move back from {from} to {to}")]
    OrderStatusBackwards { from: OrderStatus, to: OrderStatus },

    #[error("payment status cannot change from {from} to {to}")]
    PaymentStatus {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("a cancelled order cannot be marked as paid")]
    PaidWhileCancelled,
}

/// What a transition does to the order's stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    None,
    Decrement,
    Restore,
}

impl StockEffect {
    /// Effect of moving between two stock-holding states.
    #[must_use]
    pub const fn between(held_before: bool, held_after: bool) -> Self {
        match (held_before, held_after) {
            (false, true) => Self::Decrement,
            (true, false) => Self::Restore,
            _ => Self::None,
        }
    }
}

/// An allowed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub stock: StockEffect,
}

impl Transition {
    /// Whether the transition writes anything.
    #[must_use]
    pub fn changes(&self, order_status: OrderStatus, payment_status: PaymentStatus) -> bool {
        self.order_status != order_status || self.payment_status != payment_status
    }
}

/// Plan an administrative status update.
///
/// Fields left as `None` keep their current value. Setting a field to its
/// current value is a no-op.
///
/// # Errors
///
/// Returns a [`TransitionError`] describing the first rejected move.
pub fn plan_update(
    current_order: OrderStatus,
    current_payment: PaymentStatus,
    order_status: Option<OrderStatus>,
    payment_status: Option<PaymentStatus>,
) -> Result<Transition, TransitionError> {
    let next_order = order_status.unwrap_or(current_order);
    let next_payment = payment_status.unwrap_or(current_payment);

    check_order_move(current_order, next_order)?;
    check_payment_move(current_payment, next_payment)?;

    if next_order == OrderStatus::Cancelled
        && current_payment != PaymentStatus::Paid
        && next_payment == PaymentStatus::Paid
    {
        return Err(TransitionError::PaidWhileCancelled);
    }

    Ok(Transition {
        order_status: next_order,
        payment_status: next_payment,
        stock: StockEffect::between(
            holds_stock(current_order, current_payment),
            holds_stock(next_order, next_payment),
        ),
    })
}

fn check_order_move(from: OrderStatus, to: OrderStatus) -> Result<(), TransitionError> {
    if from == to || (to == OrderStatus::Cancelled && from != OrderStatus::Cancelled) {
        return Ok(());
    }
    if from == OrderStatus::Cancelled {
        return Err(TransitionError::OrderCancelled { to });
    }
    match (from.progress(), to.progress()) {
        (Some(a), Some(b)) if b > a => Ok(()),
        _ => Err(TransitionError::OrderStatusBackwards { from, to }),
    }
}

const fn check_payment_move(from: PaymentStatus, to: PaymentStatus) -> Result<(), TransitionError> {
    match (from, to) {
        (PaymentStatus::Pending, PaymentStatus::Pending | PaymentStatus::Paid)
        | (PaymentStatus::Paid, PaymentStatus::Paid | PaymentStatus::Refunded)
        | (PaymentStatus::Refunded, PaymentStatus::Refunded) => Ok(()),
        _ => Err(TransitionError::PaymentStatus { from, to }),
    }
}

/// How a confirmed payment applies to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentApplication {
    /// Mark paid, confirm, and take the items out of stock.
    Apply(Transition),
    /// The order is already paid or refunded.
    AlreadySettled,
    /// Mark paid but keep the order cancelled; stock is not touched.
    CancelledOrder(Transition),
}

/// Decide what a confirmed payment does to an order.
#[must_use]
pub fn payment_received(
    order_status: OrderStatus,
    payment_status: PaymentStatus,
) -> PaymentApplication {
    if payment_status != PaymentStatus::Pending {
        return PaymentApplication::AlreadySettled;
    }
    if order_status == OrderStatus::Cancelled {
        return PaymentApplication::CancelledOrder(Transition {
            order_status,
            payment_status: PaymentStatus::Paid,
            stock: StockEffect::None,
        });
    }

    // Payment confirms a pending order; an order already further along keeps
    // its status.
    let next_order = if order_status == OrderStatus::Pending {
        OrderStatus::Confirmed
    } else {
        order_status
    };
    PaymentApplication::Apply(Transition {
        order_status: next_order,
        payment_status: PaymentStatus::Paid,
        stock: StockEffect::Decrement,
    })
}

/// Decide what a full refund does to an order, `None` when it is not paid.
#[must_use]
pub fn refund_received(order_status: OrderStatus, payment_status: PaymentStatus) -> Option<Transition> {
    (payment_status == PaymentStatus::Paid).then(|| Transition {
        order_status,
        payment_status: PaymentStatus::Refunded,
        stock: StockEffect::between(
            holds_stock(order_status, payment_status),
            holds_stock(order_status, PaymentStatus::Refunded),
        ),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use shopwright_core::OrderStatus::{Cancelled, Confirmed, Fulfilled, Pending, Shipped};
    use shopwright_core::PaymentStatus::{Paid, Refunded};

    #[test]
    fn test_cancel_paid_order_restores_stock() {
        let t = plan_update(Confirmed, Paid, Some(Cancelled), None).unwrap();
        assert_eq!(t.order_status, Cancelled);
        assert_eq!(t.stock, StockEffect::Restore);
    }

    #[test]
    fn test_cancel_twice_restores_nothing() {
        let t = plan_update(Cancelled, Paid, Some(Cancelled), None).unwrap();
        assert_eq!(t.stock, StockEffect::None);
        assert!(!t.changes(Cancelled, Paid));
    }

    #[test]
    fn test_cancel_unpaid_order_restores_nothing() {
        let t = plan_update(Pending, PaymentStatus::Pending, Some(Cancelled), None).unwrap();
        assert_eq!(t.stock, StockEffect::None);
    }

    #[test]
    fn test_refund_after_cancel_restores_nothing() {
        let t = plan_update(Cancelled, Paid, None, Some(Refunded)).unwrap();
        assert_eq!(t.payment_status, Refunded);
        assert_eq!(t.stock, StockEffect::None);
    }

    #[test]
    fn test_refund_and_cancel_together_restore_once() {
        let t = plan_update(Shipped, Paid, Some(Cancelled), Some(Refunded)).unwrap();
        assert_eq!(t.stock, StockEffect::Restore);
    }

    #[test]
    fn test_admin_mark_paid_decrements() {
        let t = plan_update(Pending, PaymentStatus::Pending, None, Some(Paid)).unwrap();
        assert_eq!(t.stock, StockEffect::Decrement);
    }

    #[test]
    fn test_forward_moves_and_skips_allowed() {
        assert!(plan_update(Pending, Paid, Some(Shipped), None).is_ok());
        assert!(plan_update(Confirmed, Paid, Some(Fulfilled), None).is_ok());
    }

    #[test]
    fn test_backward_moves_rejected() {
        assert_eq!(
            plan_update(Shipped, Paid, Some(Pending), None),
            Err(TransitionError::OrderStatusBackwards {
                from: Shipped,
                to: Pending
            })
        );
        assert_eq!(
            plan_update(Cancelled, Paid, Some(Confirmed), None),
            Err(TransitionError::OrderCancelled { to: Confirmed })
        );
    }

    #[test]
    fn test_invalid_payment_moves_rejected() {
        assert!(plan_update(Pending, Refunded, None, Some(Paid)).is_err());
        assert!(plan_update(Pending, PaymentStatus::Pending, None, Some(Refunded)).is_err());
        assert!(plan_update(Confirmed, Paid, None, Some(PaymentStatus::Pending)).is_err());
    }

    #[test]
    fn test_cancelled_order_cannot_be_marked_paid() {
        assert_eq!(
            plan_update(Cancelled, PaymentStatus::Pending, None, Some(Paid)),
            Err(TransitionError::PaidWhileCancelled)
        );
        assert_eq!(
            plan_update(Pending, PaymentStatus::Pending, Some(Cancelled), Some(Paid)),
            Err(TransitionError::PaidWhileCancelled)
        );
    }

    #[test]
    fn test_payment_received_confirms_pending_order() {
        assert_eq!(
            payment_received(Pending, PaymentStatus::Pending),
            PaymentApplication::Apply(Transition {
                order_status: Confirmed,
                payment_status: Paid,
                stock: StockEffect::Decrement,
            })
        );
    }

    #[test]
    fn test_payment_received_keeps_later_status() {
        let PaymentApplication::Apply(t) = payment_received(Shipped, PaymentStatus::Pending) else {
            panic!("expected payment to apply");
        };
        assert_eq!(t.order_status, Shipped);
    }

    #[test]
    fn test_payment_received_for_settled_or_cancelled() {
        assert_eq!(payment_received(Confirmed, Paid), PaymentApplication::AlreadySettled);
        assert_eq!(payment_received(Confirmed, Refunded), PaymentApplication::AlreadySettled);
        assert!(matches!(
            payment_received(Cancelled, PaymentStatus::Pending),
            PaymentApplication::CancelledOrder(Transition {
                stock: StockEffect::None,
                ..
            })
        ));
    }

    #[test]
    fn test_refund_received() {
        assert_eq!(refund_received(Confirmed, PaymentStatus::Pending), None);
        assert_eq!(refund_received(Confirmed, Paid).unwrap().stock, StockEffect::Restore);
        assert_eq!(refund_received(Cancelled, Paid).unwrap().stock, StockEffect::None);
    }
}
