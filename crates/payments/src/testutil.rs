//! Mock collaborators shared by the crate's tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::charge::{ChargeError, ChargeRequest, ChargeService};
use crate::error::PaymentResult;
use crate::models::Payment;
use crate::notify::Notifier;
use crate::processing::{Outcome, Processor};
use crate::store::Ledger;

/// What the mock gateway should do with charge attempts.
#[derive(Debug, Clone)]
pub enum ChargeBehavior {
    Succeed,
    Decline(String),
    Fault(String),
}

/// Programmable charge service recording every request it sees.
pub struct MockCharge {
    pub behavior: ChargeBehavior,
    pub requests: Mutex<Vec<ChargeRequest>>,
    pub customer_payload: Value,
}

impl MockCharge {
    pub fn new(behavior: ChargeBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
            customer_payload: json!({"marker": true}),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChargeService for MockCharge {
    async fn attempt_charge(&self, request: ChargeRequest) -> Result<Value, ChargeError> {
        self.requests.lock().unwrap().push(request);
        match &self.behavior {
            ChargeBehavior::Succeed => Ok(json!({"success": true})),
            ChargeBehavior::Decline(reason) => Err(ChargeError::Declined {
                reason: reason.clone(),
            }),
            ChargeBehavior::Fault(message) => Err(ChargeError::Provider(Box::new(
                std::io::Error::other(message.clone()),
            ))),
        }
    }

    async fn retrieve_customer(&self, _customer_ref: &str) -> Result<Value, ChargeError> {
        Ok(self.customer_payload.clone())
    }
}

/// Notifier capturing every (subject, to) pair.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> Vec<(String, Vec<String>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, subject: &str, _body: &str, to: &[String]) {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), to.to_vec()));
    }
}

/// Processor with a fixed outcome, counting how often it ran.
pub struct FixedProcessor {
    outcome: Outcome,
    pub calls: AtomicUsize,
}

impl FixedProcessor {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for FixedProcessor {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn attempt(&self, _ledger: &Ledger, _payment: &Payment) -> PaymentResult<Outcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}
