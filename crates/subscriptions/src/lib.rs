// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! userpay subscriptions
//!
//! Recurring billing on top of the payment ledger.
//!
//! ## Features
//!
//! - **Recurrence**: anchored yearly/monthly/weekly date sequences
//! - **Periods**: gap-free tiling of billing intervals, lazy line items
//! - **Ensure**: idempotent upsert-by-code, safe on every request
//! - **Paid-until**: recomputed from settled payments via the reconciler seam
//! - **Batch jobs**: period creation and past-due autorenewal shutoff

pub mod engine;
pub mod error;
pub mod models;
pub mod recurrence;


// Engine
pub use engine::SubscriptionEngine;

// Error
pub use error::{SubscriptionError, SubscriptionResult};

// Models
pub use models::{NewSubscription, Subscription, SubscriptionPeriod};

// Recurrence
pub use recurrence::{recurring, Periodicity, Recurrence};
