//! Stored payment method customer records
//!
//! The charge provider's customer object is cached as an opaque JSON blob
//! next to our own bookkeeping fields. The cache is refreshed explicitly and
//! only explicitly: plain mutation is never detected, callers decide when
//! [`CustomerRecord::refresh`] runs (the stripe processor does so for
//! records older than thirty days).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::charge::ChargeService;
use crate::error::PaymentResult;

/// Records older than this get refreshed before charging.
pub const CUSTOMER_MAX_AGE_DAYS: i64 = 30;

/// A user's customer record at the charge provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub user_id: Uuid,
    pub customer_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The provider's customer object as last fetched; `None` until the
    /// first refresh.
    pub customer: Option<Value>,
}

impl CustomerRecord {
    pub fn new(user_id: Uuid, customer_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            customer_id: customer_id.into(),
            created_at: now,
            updated_at: now,
            customer: None,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.updated_at > Duration::days(CUSTOMER_MAX_AGE_DAYS)
    }

    /// Re-fetch the provider's customer object. This is the only code path
    /// that bumps `updated_at`.
    pub async fn refresh(&mut self, charge: &dyn ChargeService) -> PaymentResult<()> {
        self.customer = Some(charge.retrieve_customer(&self.customer_id).await?);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Plan ids of the customer's currently usable provider-side
    /// subscriptions.
    pub fn active_subscriptions(&self) -> HashMap<String, bool> {
        let Some(customer) = &self.customer else {
            return HashMap::new();
        };
        let subscriptions = customer
            .pointer("/subscriptions/data")
            .and_then(Value::as_array);
        let Some(subscriptions) = subscriptions else {
            return HashMap::new();
        };
        subscriptions
            .iter()
            .filter(|subscription| {
                matches!(
                    subscription.get("status").and_then(Value::as_str),
                    Some("trialing" | "active" | "past due")
                )
            })
            .filter_map(|subscription| {
                subscription
                    .pointer("/plan/id")
                    .and_then(Value::as_str)
                    .map(|id| (id.to_string(), true))
            })
            .collect()
    }

    /// Serialize for storage outside this engine.
    pub fn to_stored(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_stored(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

impl fmt::Display for CustomerRecord {
    /// Masks everything but the id prefix, mirroring how the record shows up
    /// in admin logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.customer_id.chars().take(10).collect();
        let masked = self.customer_id.chars().count().saturating_sub(10);
        write!(f, "{}{}", visible, "*".repeat(masked))
    }
}

/// Lookup of stored customer records by user. Absence is a normal outcome
/// (the stripe processor maps it to `Failure`), not an error.
#[async_trait]
pub trait CustomerVault: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Option<CustomerRecord>;

    /// Refresh the stored record from the provider and return the updated
    /// copy.
    async fn refresh(&self, user_id: Uuid) -> PaymentResult<Option<CustomerRecord>>;
}

/// In-process vault backed by the charge service for refreshes.
#[derive(Clone)]
pub struct InMemoryVault {
    charge: Arc<dyn ChargeService>,
    records: Arc<RwLock<HashMap<Uuid, CustomerRecord>>>,
}

impl InMemoryVault {
    pub fn new(charge: Arc<dyn ChargeService>) -> Self {
        Self {
            charge,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn insert(&self, record: CustomerRecord) {
        self.records.write().await.insert(record.user_id, record);
    }
}

#[async_trait]
impl CustomerVault for InMemoryVault {
    async fn get(&self, user_id: Uuid) -> Option<CustomerRecord> {
        self.records.read().await.get(&user_id).cloned()
    }

    async fn refresh(&self, user_id: Uuid) -> PaymentResult<Option<CustomerRecord>> {
        let Some(mut record) = self.get(user_id).await else {
            return Ok(None);
        };
        record.refresh(self.charge.as_ref()).await?;
        self.records.write().await.insert(user_id, record.clone());
        Ok(Some(record))
    }
}
