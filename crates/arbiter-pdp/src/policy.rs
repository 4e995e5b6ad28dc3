//! Policy snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Combining algorithm applied when none is named by the document.
pub const DEFAULT_COMBINING_ALGORITHM: &str =
    "urn:oasis:names:tc:xacml:1.0:policy-combining-algorithm:first-applicable";

/// An immutable, versioned policy document.
///
/// Snapshots are built once by a policy source and published behind an
/// `Arc`; nothing mutates them afterwards. A newer load supersedes the
/// snapshot as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    policy_set_id: String,
    version: String,
    combining_algorithm: String,
    document: serde_json::Value,
    loaded_at: DateTime<Utc>,
}

impl PolicySnapshot {
    /// Creates a snapshot with an empty document, loaded now.
    pub fn new(policy_set_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            policy_set_id: policy_set_id.into(),
            version: version.into(),
            combining_algorithm: DEFAULT_COMBINING_ALGORITHM.to_string(),
            document: serde_json::Value::Null,
            loaded_at: Utc::now(),
        }
    }

    /// Sets the combining algorithm identifier.
    pub fn with_combining_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.combining_algorithm = algorithm.into();
        self
    }

    /// Sets the opaque document handed to the evaluation engine.
    pub fn with_document(mut self, document: serde_json::Value) -> Self {
        self.document = document;
        self
    }

    /// Overrides the load timestamp.
    pub fn with_loaded_at(mut self, loaded_at: DateTime<Utc>) -> Self {
        self.loaded_at = loaded_at;
        self
    }

    /// Policy set identifier.
    pub fn policy_set_id(&self) -> &str {
        &self.policy_set_id
    }

    /// Policy version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Combining algorithm identifier.
    pub fn combining_algorithm(&self) -> &str {
        &self.combining_algorithm
    }

    /// The policy document.
    pub fn document(&self) -> &serde_json::Value {
        &self.document
    }

    /// When the snapshot was loaded.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Identity of this snapshot for results and audit records.
    pub fn reference(&self) -> PolicyRef {
        PolicyRef {
            policy_set_id: self.policy_set_id.clone(),
            version: self.version.clone(),
        }
    }
}

/// Policy set id and version a decision was made under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRef {
    /// Policy set identifier.
    pub policy_set_id: String,
    /// Policy version.
    pub version: String,
}

/// Wire form of a policy document served by a policy administration point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Policy set identifier.
    pub policy_set_id: String,
    /// Policy version.
    pub version: String,
    /// Combining algorithm identifier.
    #[serde(default = "default_combining_algorithm")]
    pub combining_algorithm: String,
    /// Engine-specific policy content.
    #[serde(default)]
    pub document: serde_json::Value,
}

fn default_combining_algorithm() -> String {
    DEFAULT_COMBINING_ALGORITHM.to_string()
}

impl From<PolicyDocument> for PolicySnapshot {
    fn from(doc: PolicyDocument) -> Self {
        Self::new(doc.policy_set_id, doc.version)
            .with_combining_algorithm(doc.combining_algorithm)
            .with_document(doc.document)
    }
}
