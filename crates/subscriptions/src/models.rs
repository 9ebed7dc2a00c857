//! Subscription data model

use std::fmt;

use chrono::{Days, NaiveDate};
use uuid::Uuid;

use userpay_shared::{BillingConfig, Cents};

use crate::recurrence::Periodicity;

/// A recurring obligation belonging to a user.
///
/// Lifecycle state is derived from the date fields rather than stored as an
/// enum: before `starts_on` the subscription has not begun; while today is
/// within `paid_until` (plus the configured grace period) it is active;
/// afterwards it has lapsed. A cancelled subscription has `ends_on` pinned
/// to `paid_until` and autorenewal disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Unique per user; identifies the subscription instance across
    /// idempotent `ensure` calls.
    pub code: String,
    pub title: String,
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
    pub periodicity: Periodicity,
    pub amount_cents: Cents,
    pub renew_automatically: bool,
    /// Latest date with settled coverage. A never-paid subscription sits at
    /// the day before `starts_on`.
    pub paid_until: NaiveDate,
}

impl Subscription {
    /// The sentinel value `paid_until` holds while nothing has been paid.
    pub fn never_paid_sentinel(starts_on: NaiveDate) -> NaiveDate {
        day_before(starts_on)
    }

    /// Settled coverage as an option: `None` until the first settled
    /// payment, so callers can tell "never paid" from "paid through X".
    pub fn paid_through(&self) -> Option<NaiveDate> {
        (self.paid_until >= self.starts_on).then_some(self.paid_until)
    }

    pub fn is_active(&self, config: &BillingConfig, today: NaiveDate) -> bool {
        self.starts_on <= today && today <= self.paid_until + config.grace_period()
    }

    pub fn in_grace_period(&self, config: &BillingConfig, today: NaiveDate) -> bool {
        self.paid_until < today && today <= self.paid_until + config.grace_period()
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// One billing interval of a subscription. `ends_on` is inclusive; periods
/// tile the recurrence sequence without gaps or overlaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionPeriod {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    /// Set once the period has been billed; at most one line item ever
    /// exists per period.
    pub line_item_id: Option<Uuid>,
}

impl SubscriptionPeriod {
    /// Title used for the period's line item.
    pub fn describe(&self, subscription: &Subscription) -> String {
        format!("{} ({} - {})", subscription, self.starts_on, self.ends_on)
    }
}

/// Fields for creating or ensuring a subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub code: String,
    pub title: String,
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
    pub periodicity: Periodicity,
    pub amount_cents: Cents,
}

// Date arithmetic used by the engine when tiling periods and advancing
// starts_on. The fallbacks only trigger at the ends of the representable
// date range.
pub(crate) fn day_after(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}

pub(crate) fn day_before(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(date)
}
