//! Applying confirmed payments and refunds to orders.
//!
//! Webhook delivery and checkout reconciliation both land here. Each
//! settlement locks the order, applies the transition with its stock effect
//! and records the event id in one unit of work, so a given event changes
//! state at most once no matter how often or how concurrently it arrives.

use tracing::{info, warn};

use shopwright_core::OrderId;

use crate::alerts::{self, OpsAlert};
use crate::db::{OrderTx, RepositoryError, Store, retry_transient};
use crate::inventory::{SkippedRestore, StockError};
use crate::models::{EventOutcome, NewPaymentEvent, Order};
use crate::orders::transitions::{self, PaymentApplication};
use crate::orders::{apply_within, report_skipped_restores};

/// Identity of the event being settled.
#[derive(Debug, Clone, Copy)]
pub struct EventRef<'a> {
    pub id: &'a str,
    pub event_type: &'a str,
}

/// Result of a settlement that was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub outcome: EventOutcome,
    /// The order after settlement, when it could be resolved.
    pub order: Option<Order>,
}

/// Settlement state carried out of the retried unit of work.
struct Settled {
    settlement: Settlement,
    alert: Option<OpsAlert>,
    skipped: Vec<SkippedRestore>,
}

/// Apply a confirmed payment for the order `reference` points at.
///
/// Returns `None` when the event was already recorded.
///
/// # Errors
///
/// Returns a repository error once retries are exhausted; nothing has been
/// recorded and the event can be delivered again.
pub async fn settle_payment<S: Store>(
    store: &S,
    event: EventRef<'_>,
    reference: Option<&str>,
) -> Result<Option<Settlement>, RepositoryError> {
    let settled = retry_transient("settle_payment", || async move {
        let mut tx = store.begin().await?;
        let Some(order) = lock_referenced(&mut tx, reference).await? else {
            let alert = OpsAlert::UnresolvableOrder {
                event_id: event.id.to_string(),
                reference: reference.map(String::from),
            };
            return finish(tx, event, EventOutcome::OrderNotFound, None, Some(alert)).await;
        };

        match transitions::payment_received(order.order_status, order.payment_status) {
            PaymentApplication::AlreadySettled => {
                finish(tx, event, EventOutcome::AlreadyPaid, Some(order), None).await
            }
            PaymentApplication::CancelledOrder(transition) => {
                let (updated, _) = apply_within(&mut tx, &order, transition)
                    .await
                    .map_err(into_repository)?;
                let alert = OpsAlert::PaymentForCancelledOrder {
                    order_id: order.id,
                    event_id: event.id.to_string(),
                };
                finish(tx, event, EventOutcome::PaidCancelledOrder, Some(updated), Some(alert)).await
            }
            PaymentApplication::Apply(transition) => {
                match apply_within(&mut tx, &order, transition).await {
                    Ok((updated, _)) => {
                        finish(tx, event, EventOutcome::Applied, Some(updated), None).await
                    }
                    Err(StockError::Repository(e)) => Err(e),
                    Err(
                        StockError::ProductNotFound(product_id)
                        | StockError::InsufficientStock { product_id, .. },
                    ) => {
                        // Partial decrements are discarded with the unit of
                        // work; the order stays unpaid and the event is
                        // recorded on its own.
                        drop(tx);
                        warn!(order_id = %order.id, product_id = %product_id, "Paid order cannot take its stock");
                        let alert = OpsAlert::StockUnavailableForPaidOrder {
                            order_id: order.id,
                            product_id,
                            event_id: event.id.to_string(),
                        };
                        let tx = store.begin().await?;
                        finish(tx, event, EventOutcome::StockUnavailable, Some(order), Some(alert))
                            .await
                    }
                }
            }
        }
    })
    .await?;

    Ok(settled.map(|settled| report(event, settled)))
}

/// Apply a full refund for the order `reference` points at.
///
/// Returns `None` when the event was already recorded.
///
/// # Errors
///
/// Returns a repository error once retries are exhausted.
pub async fn settle_refund<S: Store>(
    store: &S,
    event: EventRef<'_>,
    reference: Option<&str>,
) -> Result<Option<Settlement>, RepositoryError> {
    let settled = retry_transient("settle_refund", || async move {
        let mut tx = store.begin().await?;
        let Some(order) = lock_referenced(&mut tx, reference).await? else {
            let alert = OpsAlert::UnresolvableOrder {
                event_id: event.id.to_string(),
                reference: reference.map(String::from),
            };
            return finish(tx, event, EventOutcome::OrderNotFound, None, Some(alert)).await;
        };

        let Some(transition) = transitions::refund_received(order.order_status, order.payment_status)
        else {
            return finish(tx, event, EventOutcome::Ignored, Some(order), None).await;
        };

        let (updated, skipped) = apply_within(&mut tx, &order, transition)
            .await
            .map_err(into_repository)?;
        let mut settled = finish(tx, event, EventOutcome::Refunded, Some(updated), None).await?;
        if let Some(settled) = settled.as_mut() {
            settled.skipped = skipped;
        }
        Ok(settled)
    })
    .await?;

    Ok(settled.map(|settled| report(event, settled)))
}

/// Record an event that changes nothing.
///
/// Returns `false` when the event was already recorded.
///
/// # Errors
///
/// Returns a repository error once retries are exhausted.
pub async fn record_only<S: Store>(
    store: &S,
    event: EventRef<'_>,
    order_id: Option<OrderId>,
    outcome: EventOutcome,
) -> Result<bool, RepositoryError> {
    retry_transient("record_payment_event", || async move {
        let mut tx = store.begin().await?;
        let recorded = tx
            .record_payment_event(&new_event(event, order_id, outcome))
            .await?;
        if recorded {
            tx.commit().await?;
        }
        Ok(recorded)
    })
    .await
}

async fn lock_referenced<T: OrderTx>(
    tx: &mut T,
    reference: Option<&str>,
) -> Result<Option<Order>, RepositoryError> {
    let Some(id) = reference.and_then(|r| r.trim().parse::<OrderId>().ok()) else {
        return Ok(None);
    };
    tx.lock_order(id).await
}

/// Record the event and commit; `None` if another delivery recorded it first.
async fn finish<T: OrderTx>(
    mut tx: T,
    event: EventRef<'_>,
    outcome: EventOutcome,
    order: Option<Order>,
    alert: Option<OpsAlert>,
) -> Result<Option<Settled>, RepositoryError> {
    let order_id = order.as_ref().map(|o| o.id);
    if !tx
        .record_payment_event(&new_event(event, order_id, outcome))
        .await?
    {
        return Ok(None);
    }
    tx.commit().await?;
    Ok(Some(Settled {
        settlement: Settlement { outcome, order },
        alert,
        skipped: Vec::new(),
    }))
}

fn new_event(event: EventRef<'_>, order_id: Option<OrderId>, outcome: EventOutcome) -> NewPaymentEvent {
    NewPaymentEvent {
        event_id: event.id.to_string(),
        event_type: event.event_type.to_string(),
        order_id,
        outcome,
    }
}

/// Log the committed settlement and raise its alerts.
fn report(event: EventRef<'_>, settled: Settled) -> Settlement {
    let Settled {
        settlement,
        alert,
        skipped,
    } = settled;
    let order_id = settlement.order.as_ref().map(|o| o.id);

    info!(
        event_id = event.id,
        event_type = event.event_type,
        order_id = ?order_id,
        outcome = %settlement.outcome,
        "Payment event settled"
    );
    if let Some(alert) = &alert {
        alerts::raise(alert);
    }
    if let Some(order_id) = order_id {
        report_skipped_restores(order_id, &skipped);
    }
    settlement
}

fn into_repository(e: StockError) -> RepositoryError {
    match e {
        StockError::Repository(e) => e,
        other => RepositoryError::DataCorruption(other.to_string()),
    }
}
