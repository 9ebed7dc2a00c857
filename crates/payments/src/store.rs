//! Line item ledger
//!
//! In-process store for users, line items and payments, shared as a cheap
//! cloneable handle. Persistence lives outside this engine; the ledger keeps
//! the invariants the data model demands: a line item bound to a payment is
//! protected against deletion, a settled payment keeps its binding until it
//! is explicitly undone, and the select-create-bind sequence of
//! [`Ledger::create_pending`] is atomic against concurrent callers because
//! the write lock spans the whole sequence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use userpay_shared::{Cents, User};

use crate::error::{PaymentError, PaymentResult};
use crate::models::{LineItem, Payment};

#[derive(Default)]
struct LedgerState {
    users: HashMap<Uuid, User>,
    line_items: HashMap<Uuid, LineItem>,
    payments: HashMap<Uuid, Payment>,
}

/// Shared handle on the in-memory ledger.
#[derive(Clone, Default)]
pub struct Ledger {
    inner: Arc<RwLock<LedgerState>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------

    pub async fn upsert_user(&self, user: User) {
        self.inner.write().await.users.insert(user.id, user);
    }

    pub async fn user(&self, user_id: Uuid) -> Option<User> {
        self.inner.read().await.users.get(&user_id).cloned()
    }

    /// Users that currently have at least one unbound line item.
    pub async fn users_with_unbound_items(&self) -> Vec<User> {
        let state = self.inner.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|user| {
                state
                    .line_items
                    .values()
                    .any(|item| item.user_id == user.id && item.payment_id.is_none())
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        users
    }

    // -------------------------------------------------------------------
    // Line items
    // -------------------------------------------------------------------

    pub async fn create_line_item(
        &self,
        user_id: Uuid,
        title: impl Into<String>,
        amount_cents: Cents,
    ) -> PaymentResult<LineItem> {
        let mut state = self.inner.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(PaymentError::UserNotFound(user_id));
        }
        let item = LineItem {
            id: Uuid::new_v4(),
            user_id,
            created_at: Utc::now(),
            title: title.into(),
            amount_cents,
            payment_id: None,
        };
        state.line_items.insert(item.id, item.clone());
        debug!(item = %item, user_id = %user_id, "created line item");
        Ok(item)
    }

    pub async fn line_item(&self, item_id: Uuid) -> PaymentResult<LineItem> {
        self.inner
            .read()
            .await
            .line_items
            .get(&item_id)
            .cloned()
            .ok_or(PaymentError::LineItemNotFound(item_id))
    }

    /// Delete a line item. Bound items are protected; the payment binding
    /// has to be cleared first.
    pub async fn delete_line_item(&self, item_id: Uuid) -> PaymentResult<()> {
        let mut state = self.inner.write().await;
        let item = state
            .line_items
            .get(&item_id)
            .ok_or(PaymentError::LineItemNotFound(item_id))?;
        if item.payment_id.is_some() {
            return Err(PaymentError::LineItemBound(item_id));
        }
        state.line_items.remove(&item_id);
        Ok(())
    }

    /// Rewrite the amount of a still-unbound line item (subscription price
    /// changes). Bound items are never repriced.
    pub async fn reprice_unbound(&self, item_id: Uuid, amount_cents: Cents) -> PaymentResult<()> {
        let mut state = self.inner.write().await;
        let item = state
            .line_items
            .get_mut(&item_id)
            .ok_or(PaymentError::LineItemNotFound(item_id))?;
        if item.payment_id.is_some() {
            return Err(PaymentError::LineItemBound(item_id));
        }
        item.amount_cents = amount_cents;
        Ok(())
    }

    /// Line items not yet attached to any payment, newest first.
    pub async fn unbound_items(&self, user_id: Uuid) -> Vec<LineItem> {
        let state = self.inner.read().await;
        let mut items: Vec<LineItem> = state
            .line_items
            .values()
            .filter(|item| item.user_id == user_id && item.payment_id.is_none())
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    /// Line items that are unbound or bound to a payment that has not been
    /// charged yet, newest first.
    pub async fn unpaid_items(&self, user_id: Uuid) -> Vec<LineItem> {
        let state = self.inner.read().await;
        let mut items: Vec<LineItem> = state
            .line_items
            .values()
            .filter(|item| {
                item.user_id == user_id
                    && match item.payment_id {
                        None => true,
                        Some(payment_id) => state
                            .payments
                            .get(&payment_id)
                            .is_none_or(|payment| payment.charged_at.is_none()),
                    }
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    pub async fn items_of_payment(&self, payment_id: Uuid) -> Vec<LineItem> {
        let state = self.inner.read().await;
        let mut items: Vec<LineItem> = state
            .line_items
            .values()
            .filter(|item| item.payment_id == Some(payment_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    // -------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------

    pub async fn payment(&self, payment_id: Uuid) -> PaymentResult<Payment> {
        self.inner
            .read()
            .await
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or(PaymentError::PaymentNotFound(payment_id))
    }

    pub async fn payment_count(&self) -> usize {
        self.inner.read().await.payments.len()
    }

    /// Payments that have been created but not charged yet.
    pub async fn pending_payments(&self) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .inner
            .read()
            .await
            .payments
            .values()
            .filter(|payment| payment.charged_at.is_none())
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        payments
    }

    /// Create a pending payment from the user's unbound line items,
    /// optionally narrowed to an explicit subset.
    ///
    /// Returns `Ok(None)` if there is nothing to bind; callers treat this as
    /// a normal no-op. The whole select-create-bind sequence runs under one
    /// write lock so a concurrent call can never double-bind an item.
    pub async fn create_pending(
        &self,
        user_id: Uuid,
        items: Option<&[Uuid]>,
        email: Option<String>,
    ) -> PaymentResult<Option<Payment>> {
        let mut state = self.inner.write().await;
        let user = state
            .users
            .get(&user_id)
            .cloned()
            .ok_or(PaymentError::UserNotFound(user_id))?;

        let selected: Vec<Uuid> = state
            .line_items
            .values()
            .filter(|item| {
                item.user_id == user_id
                    && item.payment_id.is_none()
                    && items.is_none_or(|subset| subset.contains(&item.id))
            })
            .map(|item| item.id)
            .collect();
        if selected.is_empty() {
            return Ok(None);
        }

        let amount_cents = selected
            .iter()
            .filter_map(|id| state.line_items.get(id))
            .map(|item| item.amount_cents)
            .sum();
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id,
            created_at: Utc::now(),
            charged_at: None,
            amount_cents,
            email: email.unwrap_or(user.email),
            provider: None,
            transaction: None,
        };
        for id in &selected {
            if let Some(item) = state.line_items.get_mut(id) {
                item.payment_id = Some(payment.id);
            }
        }
        state.payments.insert(payment.id, payment.clone());
        debug!(payment = %payment, email = %payment.email, "created pending payment");
        Ok(Some(payment))
    }

    /// Unbind all line items and delete the payment.
    ///
    /// Only pending payments may be cancelled; calling this on a settled
    /// payment is a programming error.
    pub async fn cancel_pending(&self, payment_id: Uuid) -> PaymentResult<()> {
        let mut state = self.inner.write().await;
        let payment = state
            .payments
            .get(&payment_id)
            .ok_or(PaymentError::PaymentNotFound(payment_id))?;
        assert!(
            payment.charged_at.is_none(),
            "cancel_pending called on a settled payment"
        );
        for item in state.line_items.values_mut() {
            if item.payment_id == Some(payment_id) {
                item.payment_id = None;
            }
        }
        state.payments.remove(&payment_id);
        Ok(())
    }

    /// Revert a settled payment: clear the settlement timestamp first, then
    /// unbind the line items, so anything observing the persisted payment
    /// sees the cleared state with a consistent pre-unbind item set.
    ///
    /// Only settled payments may be undone; calling this on a pending
    /// payment is a programming error.
    pub async fn undo(&self, payment_id: Uuid) -> PaymentResult<Payment> {
        let mut state = self.inner.write().await;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(PaymentError::PaymentNotFound(payment_id))?;
        assert!(
            payment.charged_at.is_some(),
            "undo called on a payment that was never settled"
        );
        payment.charged_at = None;
        payment.provider = None;
        payment.transaction = None;
        let reverted = payment.clone();
        for item in state.line_items.values_mut() {
            if item.payment_id == Some(payment_id) {
                item.payment_id = None;
            }
        }
        Ok(reverted)
    }

    /// Record a successful settlement.
    pub async fn mark_charged(
        &self,
        payment_id: Uuid,
        provider: &str,
        transaction: String,
        charged_at: DateTime<Utc>,
    ) -> PaymentResult<Payment> {
        let mut state = self.inner.write().await;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(PaymentError::PaymentNotFound(payment_id))?;
        payment.charged_at = Some(charged_at);
        payment.provider = Some(provider.to_string());
        payment.transaction = Some(transaction);
        Ok(payment.clone())
    }
}
