// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! userpay payments
//!
//! Turns individually priced line items into aggregated payments and drives
//! those payments through a chain of settlement strategies.
//!
//! ## Features
//!
//! - **Line item ledger**: unbound/unpaid tracking with protect-on-delete
//! - **Payment aggregation**: atomic create-pending, cancel, undo
//! - **Processor chain**: success / failure / terminate short-circuiting
//! - **Built-in processors**: stored-customer charging, "please pay" mail
//! - **Customer records**: cached provider blobs with explicit refresh
//! - **Reconciliation seam**: explicit paid-until recomputation hook

pub mod charge;
pub mod client;
pub mod customers;
pub mod error;
pub mod models;
pub mod notify;
pub mod processing;
pub mod processors;
pub mod reconcile;
pub mod store;

#[cfg(test)]
mod processing_tests;
#[cfg(test)]
pub(crate) mod testutil;

// Charge service
pub use charge::{ChargeError, ChargeRequest, ChargeService};

// Stripe gateway
pub use client::{StripeConfig, StripeGateway};

// Customers
pub use customers::{CustomerRecord, CustomerVault, InMemoryVault, CUSTOMER_MAX_AGE_DAYS};

// Error
pub use error::{PaymentError, PaymentResult};

// Models
pub use models::{LineItem, Payment};

// Notifications
pub use notify::{LogNotifier, Notifier};

// Processing
pub use processing::{Outcome, Payments, Processor};

// Built-in processors
pub use processors::{PleasePayMail, WithStripeCustomer};

// Reconciliation
pub use reconcile::{NoopReconciler, Reconciler};

// Store
pub use store::Ledger;
