//! Engine configuration
//!
//! A single explicit struct constructed once at process start and passed by
//! reference into the components that need it. There is no global settings
//! registry; batch jobs and processors receive this by value or `&`.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Settings consumed by the payments and subscriptions crates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// ISO 4217 currency code handed to the charge service.
    pub currency: String,
    /// Days after `paid_until` during which a subscription still counts as
    /// active.
    pub grace_period_days: i64,
    /// Days a subscription may stay unpaid before autorenewal is disabled.
    pub disable_autorenewal_after_days: i64,
    /// Addresses bcc'd on payment notification mails.
    pub managers: Vec<String>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            currency: "CHF".to_string(),
            grace_period_days: 3,
            disable_autorenewal_after_days: 15,
            managers: Vec::new(),
        }
    }
}

impl BillingConfig {
    /// Build the configuration from `USERPAY_*` environment variables,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            currency: std::env::var("USERPAY_CURRENCY").unwrap_or(defaults.currency),
            grace_period_days: env_i64("USERPAY_GRACE_PERIOD_DAYS", defaults.grace_period_days),
            disable_autorenewal_after_days: env_i64(
                "USERPAY_DISABLE_AUTORENEWAL_AFTER_DAYS",
                defaults.disable_autorenewal_after_days,
            ),
            managers: std::env::var("USERPAY_MANAGERS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.managers),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::days(self.grace_period_days)
    }

    pub fn disable_autorenewal_after(&self) -> Duration {
        Duration::days(self.disable_autorenewal_after_days)
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = BillingConfig::default();
        assert_eq!(config.currency, "CHF");
        assert_eq!(config.grace_period(), Duration::days(3));
        assert_eq!(config.disable_autorenewal_after(), Duration::days(15));
        assert!(config.managers.is_empty());
    }
}
