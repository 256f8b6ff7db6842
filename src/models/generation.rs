//! Response store generations and structured records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named snapshot of the response store. Exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Handle returned by `ResponseStore::open_generation`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationHandle {
    name: String,
}

impl GenerationHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One decoded payload in the structured store, keyed by request URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub url: String,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
}
