//! Error types for the subscriptions crate

use thiserror::Error;
use uuid::Uuid;

use crate::recurrence::Periodicity;

pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("unknown subscription: {0}")]
    NotFound(Uuid),

    #[error("subscription with code {code:?} already exists for user {user_id}")]
    DuplicateCode { user_id: Uuid, code: String },

    /// Periods cannot be generated automatically for this periodicity.
    /// Surfaced to the administrator instead of silently skipping the
    /// subscription.
    #[error("unknown periodicity: {0}")]
    UnknownPeriodicity(Periodicity),

    #[error("not a valid periodicity: {0:?}")]
    InvalidPeriodicity(String),

    #[error(transparent)]
    Payment(#[from] userpay_payments::PaymentError),
}
