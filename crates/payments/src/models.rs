//! Payment and line item data model

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use userpay_shared::{format_cents, Cents};

/// A single priced obligation owed by a user.
///
/// A line item with no payment reference is *unbound*; a line item whose
/// payment has not been charged yet is *unpaid*. Amounts are only ever
/// rewritten while a line item is unbound (subscription price changes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub amount_cents: Cents,
    pub payment_id: Option<Uuid>,
}

impl fmt::Display for LineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// An aggregation of line items representing one settlement attempt.
///
/// `amount_cents` is fixed to the sum of the bound line items at creation
/// time. A payment with `charged_at` set is settled and its line item
/// binding is immutable until `undo` clears the settlement again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub charged_at: Option<DateTime<Utc>>,
    pub amount_cents: Cents,
    /// Contact address, defaulted from the user at creation.
    pub email: String,
    /// Identifier of the settlement provider that captured this payment.
    pub provider: Option<String>,
    /// Opaque transaction record returned by the provider.
    pub transaction: Option<String>,
}

impl Payment {
    pub fn is_pending(&self) -> bool {
        self.charged_at.is_none()
    }

    /// Human-readable settlement description, e.g. for charge requests:
    /// `"Payment of 5.00 by user@example.com: Something"`.
    pub fn description(&self, items: &[LineItem]) -> String {
        let titles: Vec<&str> = items.iter().map(|item| item.title.as_str()).collect();
        format!(
            "Payment of {} by {}: {}",
            format_cents(self.amount_cents),
            self.email,
            titles.join(", ")
        )
    }
}

impl fmt::Display for Payment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.charged_at.is_some() {
            write!(f, "Payment of {}", format_cents(self.amount_cents))
        } else {
            write!(f, "Pending payment of {}", format_cents(self.amount_cents))
        }
    }
}
