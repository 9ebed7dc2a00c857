//! Paid-until reconciliation seam
//!
//! The aggregator invokes the reconciler explicitly after every settlement
//! state change instead of going through an implicit event bus. The
//! subscriptions crate provides the real implementation; payments-only
//! deployments and tests use [`NoopReconciler`].

use async_trait::async_trait;

use crate::models::{LineItem, Payment};
use crate::store::Ledger;

#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Called after `payment` has been settled or a settlement was reverted.
    /// `items` are the line items that were bound to the payment at the time
    /// of the state change (an undo unbinds them, so they are captured
    /// beforehand). Implementations recompute derived state, e.g. a
    /// subscription's paid-until boundary, for everything referencing those
    /// items.
    async fn reconcile(&self, ledger: &Ledger, payment: &Payment, items: &[LineItem]);
}

#[derive(Debug, Clone, Default)]
pub struct NoopReconciler;

#[async_trait]
impl Reconciler for NoopReconciler {
    async fn reconcile(&self, _ledger: &Ledger, _payment: &Payment, _items: &[LineItem]) {}
}
