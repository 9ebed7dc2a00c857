//! Error types for the payments crate

use thiserror::Error;
use uuid::Uuid;

use crate::charge::ChargeError;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("unknown user: {0}")]
    UserNotFound(Uuid),

    #[error("unknown payment: {0}")]
    PaymentNotFound(Uuid),

    #[error("unknown line item: {0}")]
    LineItemNotFound(Uuid),

    /// A line item bound to a payment is protected against deletion; the
    /// binding has to be cleared first (by cancelling or undoing the
    /// payment).
    #[error("line item {0} is bound to a payment and cannot be deleted")]
    LineItemBound(Uuid),

    #[error(transparent)]
    Charge(#[from] ChargeError),
}
