#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared types for the userpay workspace
//!
//! Holds the value types and the configuration struct that both the payments
//! and subscriptions crates depend on. Nothing here performs I/O.

pub mod config;
pub mod money;
pub mod types;

pub use config::BillingConfig;
pub use money::{format_cents, Cents};
pub use types::User;
