//! Subscription lifecycle engine
//!
//! Owns subscription and period state, tiles billing periods from the
//! recurrence sequence, materializes line items in the payment ledger and
//! keeps every subscription's paid-until boundary in sync with settlement
//! state. The engine doubles as the ledger's [`Reconciler`]: settling or
//! undoing a payment recomputes paid-until for every subscription whose
//! periods were covered by that payment.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use userpay_payments::{Ledger, LineItem, Payment, Reconciler};
use userpay_shared::{BillingConfig, Cents};

use crate::error::{SubscriptionError, SubscriptionResult};
use crate::models::{day_after, day_before, NewSubscription, Subscription, SubscriptionPeriod};
use crate::recurrence::{recurring, Periodicity};

#[derive(Default)]
struct EngineState {
    subscriptions: HashMap<Uuid, Subscription>,
    periods: HashMap<Uuid, SubscriptionPeriod>,
}

impl EngineState {
    fn find_by_code(&self, user_id: Uuid, code: &str) -> Option<&Subscription> {
        self.subscriptions
            .values()
            .find(|s| s.user_id == user_id && s.code == code)
    }

    fn periods_of(&self, subscription_id: Uuid) -> Vec<SubscriptionPeriod> {
        let mut periods: Vec<SubscriptionPeriod> = self
            .periods
            .values()
            .filter(|p| p.subscription_id == subscription_id)
            .cloned()
            .collect();
        periods.sort_by_key(|p| p.starts_on);
        periods
    }
}

/// In-memory subscription store plus the operations that mutate it.
///
/// All mutating operations take the engine write lock for their whole
/// duration, so concurrent `ensure` calls for the same `(user, code)` cannot
/// create the subscription twice. Lock ordering is engine before ledger;
/// the ledger never calls back into the engine.
#[derive(Clone)]
pub struct SubscriptionEngine {
    ledger: Ledger,
    config: BillingConfig,
    state: Arc<RwLock<EngineState>>,
}

impl SubscriptionEngine {
    pub fn new(ledger: Ledger, config: BillingConfig) -> Self {
        Self {
            ledger,
            config,
            state: Arc::new(RwLock::new(EngineState::default())),
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // -------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------

    pub async fn subscription(&self, id: Uuid) -> SubscriptionResult<Subscription> {
        self.state
            .read()
            .await
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or(SubscriptionError::NotFound(id))
    }

    pub async fn find_by_code(&self, user_id: Uuid, code: &str) -> Option<Subscription> {
        self.state.read().await.find_by_code(user_id, code).cloned()
    }

    /// A user's subscriptions, ordered by code.
    pub async fn subscriptions_of_user(&self, user_id: Uuid) -> Vec<Subscription> {
        let state = self.state.read().await;
        let mut subscriptions: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.code.cmp(&b.code));
        subscriptions
    }

    /// Periods of one subscription, ordered by start date.
    pub async fn periods_of(&self, subscription_id: Uuid) -> Vec<SubscriptionPeriod> {
        self.state.read().await.periods_of(subscription_id)
    }

    pub async fn period_count(&self) -> usize {
        self.state.read().await.periods.len()
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Create a new subscription. `paid_until` starts one day before
    /// `starts_on`; for recurring periodicities, periods are tiled up to
    /// `today` right away.
    pub async fn create(
        &self,
        new: NewSubscription,
        today: NaiveDate,
    ) -> SubscriptionResult<Subscription> {
        let mut state = self.state.write().await;
        self.create_locked(&mut state, new, today)
    }

    fn create_locked(
        &self,
        state: &mut EngineState,
        new: NewSubscription,
        today: NaiveDate,
    ) -> SubscriptionResult<Subscription> {
        if state.find_by_code(new.user_id, &new.code).is_some() {
            return Err(SubscriptionError::DuplicateCode {
                user_id: new.user_id,
                code: new.code,
            });
        }
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            code: new.code,
            title: new.title,
            starts_on: new.starts_on,
            ends_on: new.ends_on,
            periodicity: new.periodicity,
            amount_cents: new.amount_cents,
            renew_automatically: true,
            paid_until: Subscription::never_paid_sentinel(new.starts_on),
        };
        let id = subscription.id;
        info!(
            subscription_id = %id,
            user_id = %subscription.user_id,
            code = %subscription.code,
            "created subscription"
        );
        state.subscriptions.insert(id, subscription.clone());
        if subscription.periodicity != Periodicity::Manually {
            self.create_periods_locked(state, id, today)?;
        }
        Ok(subscription)
    }

    /// Idempotent upsert by `(user, code)`. Updates the stored fields,
    /// resets all pending periods, advances `starts_on` past the paid
    /// boundary when the subscription is paid into the future, then re-tiles
    /// periods up to `today`. Safe to call on every request: identical
    /// arguments leave paid periods, the period count and `starts_on`
    /// untouched.
    pub async fn ensure(
        &self,
        new: NewSubscription,
        today: NaiveDate,
    ) -> SubscriptionResult<Subscription> {
        let mut state = self.state.write().await;
        let Some(id) = state.find_by_code(new.user_id, &new.code).map(|s| s.id) else {
            return self.create_locked(&mut state, new, today);
        };

        {
            let subscription = state
                .subscriptions
                .get_mut(&id)
                .ok_or(SubscriptionError::NotFound(id))?;
            if subscription.amount_cents != new.amount_cents {
                debug!(
                    subscription_id = %id,
                    old = subscription.amount_cents,
                    new = new.amount_cents,
                    "subscription amount changed"
                );
            }
            subscription.title = new.title;
            subscription.ends_on = new.ends_on;
            subscription.periodicity = new.periodicity;
            subscription.amount_cents = new.amount_cents;
            if subscription.starts_on != new.starts_on {
                info!(
                    subscription_id = %id,
                    starts_on = %new.starts_on,
                    "subscription start changed"
                );
                subscription.starts_on = new.starts_on;
                // Keep the never-paid sentinel in step with the new start.
                let sentinel = Subscription::never_paid_sentinel(new.starts_on);
                if subscription.paid_until < sentinel {
                    subscription.paid_until = sentinel;
                }
            }
        }

        self.delete_pending_periods_locked(&mut state, id).await?;

        let periodicity = {
            let subscription = state
                .subscriptions
                .get_mut(&id)
                .ok_or(SubscriptionError::NotFound(id))?;
            if subscription.paid_until > today {
                let next_start = day_after(subscription.paid_until);
                if next_start > subscription.starts_on {
                    info!(
                        subscription_id = %id,
                        starts_on = %next_start,
                        "moving start past paid boundary"
                    );
                    subscription.starts_on = next_start;
                }
            }
            subscription.periodicity
        };
        if periodicity != Periodicity::Manually {
            self.create_periods_locked(&mut state, id, today)?;
        }
        state
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or(SubscriptionError::NotFound(id))
    }

    /// Change the per-period amount and propagate it to line items of
    /// periods that have not been drawn into a payment yet.
    pub async fn set_amount(&self, id: Uuid, amount_cents: Cents) -> SubscriptionResult<()> {
        let mut state = self.state.write().await;
        let subscription = state
            .subscriptions
            .get_mut(&id)
            .ok_or(SubscriptionError::NotFound(id))?;
        subscription.amount_cents = amount_cents;
        let items: Vec<Uuid> = state
            .periods
            .values()
            .filter(|p| p.subscription_id == id)
            .filter_map(|p| p.line_item_id)
            .collect();
        for item_id in items {
            let Ok(item) = self.ledger.line_item(item_id).await else {
                continue;
            };
            if item.payment_id.is_none() {
                self.ledger.reprice_unbound(item_id, amount_cents).await?;
            }
        }
        Ok(())
    }

    /// End the subscription at its paid boundary. Settled history stays;
    /// anything pending is discarded.
    pub async fn cancel(&self, id: Uuid) -> SubscriptionResult<Subscription> {
        let mut state = self.state.write().await;
        self.cancel_locked(&mut state, id).await
    }

    async fn cancel_locked(
        &self,
        state: &mut EngineState,
        id: Uuid,
    ) -> SubscriptionResult<Subscription> {
        {
            let subscription = state
                .subscriptions
                .get_mut(&id)
                .ok_or(SubscriptionError::NotFound(id))?;
            subscription.ends_on = Some(subscription.paid_until);
            subscription.renew_automatically = false;
            info!(
                subscription_id = %id,
                ends_on = %subscription.paid_until,
                "cancelled subscription"
            );
        }
        self.delete_pending_periods_locked(state, id).await?;
        state
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or(SubscriptionError::NotFound(id))
    }

    // -------------------------------------------------------------------
    // Periods
    // -------------------------------------------------------------------

    /// Tile periods from the recurrence sequence, one for every period
    /// start up to `until` (capped at `ends_on` when set). Existing starts
    /// are skipped, so re-running is harmless.
    pub async fn create_periods(
        &self,
        id: Uuid,
        until: NaiveDate,
    ) -> SubscriptionResult<Vec<SubscriptionPeriod>> {
        let mut state = self.state.write().await;
        self.create_periods_locked(&mut state, id, until)
    }

    fn create_periods_locked(
        &self,
        state: &mut EngineState,
        id: Uuid,
        until: NaiveDate,
    ) -> SubscriptionResult<Vec<SubscriptionPeriod>> {
        let subscription = state
            .subscriptions
            .get(&id)
            .ok_or(SubscriptionError::NotFound(id))?
            .clone();
        let mut cap = until;
        if let Some(ends_on) = subscription.ends_on {
            cap = cap.min(ends_on);
        }

        let existing: HashSet<NaiveDate> = state
            .periods
            .values()
            .filter(|p| p.subscription_id == id)
            .map(|p| p.starts_on)
            .collect();

        let mut created = Vec::new();
        let mut starts = recurring(subscription.starts_on, subscription.periodicity)?;
        let mut this_start = match starts.next() {
            Some(day) => day,
            None => return Ok(created),
        };
        while this_start <= cap {
            let Some(next_start) = starts.next() else {
                break;
            };
            if !existing.contains(&this_start) {
                let period = SubscriptionPeriod {
                    id: Uuid::new_v4(),
                    subscription_id: id,
                    starts_on: this_start,
                    ends_on: day_before(next_start),
                    line_item_id: None,
                };
                debug!(
                    subscription_id = %id,
                    starts_on = %period.starts_on,
                    ends_on = %period.ends_on,
                    "created period"
                );
                state.periods.insert(period.id, period.clone());
                created.push(period);
            }
            this_start = next_start;
        }
        Ok(created)
    }

    /// Materialize a line item for every period that does not have one yet,
    /// priced at the owning subscription's current amount. Idempotent.
    pub async fn create_line_items(&self) -> SubscriptionResult<Vec<LineItem>> {
        let mut state = self.state.write().await;
        let mut pending: Vec<(NaiveDate, Uuid)> = state
            .periods
            .values()
            .filter(|p| p.line_item_id.is_none())
            .map(|p| (p.starts_on, p.id))
            .collect();
        pending.sort();

        let mut created = Vec::new();
        for (_, period_id) in pending {
            let Some(period) = state.periods.get(&period_id).cloned() else {
                continue;
            };
            let subscription = state
                .subscriptions
                .get(&period.subscription_id)
                .ok_or(SubscriptionError::NotFound(period.subscription_id))?
                .clone();
            let item = self
                .ledger
                .create_line_item(
                    subscription.user_id,
                    period.describe(&subscription),
                    subscription.amount_cents,
                )
                .await?;
            if let Some(period) = state.periods.get_mut(&period_id) {
                period.line_item_id = Some(item.id);
            }
            created.push(item);
        }
        Ok(created)
    }

    /// Drop every period that has not been settled. Pending payments drawn
    /// from those periods are cancelled and the line items deleted; settled
    /// periods stay as historical record.
    pub async fn delete_pending_periods(&self, id: Uuid) -> SubscriptionResult<()> {
        let mut state = self.state.write().await;
        self.delete_pending_periods_locked(&mut state, id).await
    }

    async fn delete_pending_periods_locked(
        &self,
        state: &mut EngineState,
        id: Uuid,
    ) -> SubscriptionResult<()> {
        let period_ids: Vec<Uuid> = state
            .periods
            .values()
            .filter(|p| p.subscription_id == id)
            .map(|p| p.id)
            .collect();
        for period_id in period_ids {
            let Some(period) = state.periods.get(&period_id).cloned() else {
                continue;
            };
            if let Some(item_id) = period.line_item_id {
                if let Ok(item) = self.ledger.line_item(item_id).await {
                    if let Some(payment_id) = item.payment_id {
                        let payment = self.ledger.payment(payment_id).await?;
                        if payment.charged_at.is_some() {
                            // Settled. The period is history now.
                            continue;
                        }
                        self.ledger.cancel_pending(payment_id).await?;
                    }
                    self.ledger.delete_line_item(item_id).await?;
                }
            }
            state.periods.remove(&period_id);
            debug!(
                subscription_id = %id,
                starts_on = %period.starts_on,
                "deleted pending period"
            );
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Paid-until reconciliation
    // -------------------------------------------------------------------

    /// Recompute `paid_until` as the maximum `ends_on` over periods whose
    /// line item belongs to a settled payment. Returns `None` when nothing
    /// is paid. With `persist` the stored field is updated too, resetting
    /// to the never-paid sentinel on `None`; without it this is a pure
    /// query.
    pub async fn update_paid_until(
        &self,
        id: Uuid,
        persist: bool,
    ) -> SubscriptionResult<Option<NaiveDate>> {
        let mut state = self.state.write().await;
        let periods = state.periods_of(id);

        let mut paid_through: Option<NaiveDate> = None;
        for period in periods {
            let Some(item_id) = period.line_item_id else {
                continue;
            };
            let Ok(item) = self.ledger.line_item(item_id).await else {
                continue;
            };
            let Some(payment_id) = item.payment_id else {
                continue;
            };
            let Ok(payment) = self.ledger.payment(payment_id).await else {
                continue;
            };
            if payment.charged_at.is_some() {
                paid_through = Some(paid_through.map_or(period.ends_on, |d| d.max(period.ends_on)));
            }
        }

        if persist {
            let subscription = state
                .subscriptions
                .get_mut(&id)
                .ok_or(SubscriptionError::NotFound(id))?;
            subscription.paid_until = paid_through
                .unwrap_or_else(|| Subscription::never_paid_sentinel(subscription.starts_on));
            debug!(
                subscription_id = %id,
                paid_until = %subscription.paid_until,
                "recomputed paid-until"
            );
        } else if !state.subscriptions.contains_key(&id) {
            return Err(SubscriptionError::NotFound(id));
        }
        Ok(paid_through)
    }

    // -------------------------------------------------------------------
    // Batch operations
    // -------------------------------------------------------------------

    /// Tile periods up to `today` for every auto-renewing subscription.
    /// Subscriptions whose periods cannot be generated automatically are
    /// warned about and skipped, never aborting the batch. Returns the
    /// number of periods created.
    pub async fn create_periods_all(&self, today: NaiveDate) -> usize {
        let mut state = self.state.write().await;
        let ids: Vec<Uuid> = state
            .subscriptions
            .values()
            .filter(|s| s.renew_automatically)
            .map(|s| s.id)
            .collect();
        let mut total = 0;
        for id in ids {
            match self.create_periods_locked(&mut state, id, today) {
                Ok(created) => total += created.len(),
                Err(err) => {
                    warn!(subscription_id = %id, error = %err, "period creation failed");
                }
            }
        }
        total
    }

    /// Cancel auto-renewing subscriptions whose paid boundary has fallen
    /// further behind `today` than the configured window. Returns the ids
    /// of the subscriptions that were cancelled.
    pub async fn disable_autorenewal(&self, today: NaiveDate) -> SubscriptionResult<Vec<Uuid>> {
        let cutoff = today
            .checked_sub_signed(self.config.disable_autorenewal_after())
            .unwrap_or(today);
        let mut state = self.state.write().await;
        let overdue: Vec<Uuid> = state
            .subscriptions
            .values()
            .filter(|s| s.renew_automatically && s.paid_until < cutoff)
            .map(|s| s.id)
            .collect();
        for &id in &overdue {
            info!(subscription_id = %id, "disabling autorenewal, subscription is past due");
            self.cancel_locked(&mut state, id).await?;
        }
        Ok(overdue)
    }
}

#[async_trait]
impl Reconciler for SubscriptionEngine {
    async fn reconcile(&self, _ledger: &Ledger, payment: &Payment, items: &[LineItem]) {
        let item_ids: HashSet<Uuid> = items.iter().map(|item| item.id).collect();
        let affected: HashSet<Uuid> = {
            let state = self.state.read().await;
            state
                .periods
                .values()
                .filter(|p| p.line_item_id.is_some_and(|id| item_ids.contains(&id)))
                .map(|p| p.subscription_id)
                .collect()
        };
        for id in affected {
            match self.update_paid_until(id, true).await {
                Ok(paid_through) => {
                    info!(
                        subscription_id = %id,
                        payment_id = %payment.id,
                        paid_through = ?paid_through,
                        "reconciled paid-until"
                    );
                }
                Err(err) => {
                    warn!(
                        subscription_id = %id,
                        payment_id = %payment.id,
                        error = %err,
                        "paid-until reconciliation failed"
                    );
                }
            }
        }
    }
}
