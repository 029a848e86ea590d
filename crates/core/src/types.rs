// crates/core/src/types.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque pipeline stage identifier.
///
/// Small positive integers on the wire, but nothing outside the catalog
/// should depend on their numeric value or ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub i64);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lead identifier, unique within one client's lead set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub String);

impl LeadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LeadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tenant scope for lead visibility, supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One named step in the lead pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub name: String,
}

impl Stage {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: StageId(id),
            name: name.into(),
        }
    }
}

/// A prospective customer tracked through the pipeline.
///
/// Only `current_stage_id` and `last_update` ever change on the client side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: LeadId,
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_type: Option<String>,
    pub current_stage_id: StageId,
    pub last_update: DateTime<Utc>,
}

impl Lead {
    /// Minimal lead with empty contact fields, mostly useful in tests and fixtures.
    pub fn new(id: impl Into<String>, name: impl Into<String>, stage: StageId) -> Self {
        Self {
            id: LeadId::new(id),
            name: name.into(),
            phone: String::new(),
            email: String::new(),
            offer_type: None,
            current_stage_id: stage,
            last_update: Utc::now(),
        }
    }
}
