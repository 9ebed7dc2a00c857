//! Cross-crate value types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A billable user as seen by this engine.
///
/// The surrounding application owns authentication and profile data; the
/// engine only needs a stable id and a contact address to default payment
/// emails from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
        }
    }
}
