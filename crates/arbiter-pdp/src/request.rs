//! Authorization requests and their attributes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipError;

/// Attribute identifier carrying the resource id.
pub const RESOURCE_ID: &str = "urn:oasis:names:tc:xacml:1.0:resource:resource-id";

/// Attribute identifier carrying the subject id.
pub const SUBJECT_ID: &str = "urn:oasis:names:tc:xacml:1.0:subject:subject-id";

/// Attribute identifier carrying the action id.
pub const ACTION_ID: &str = "urn:oasis:names:tc:xacml:1.0:action:action-id";

/// Data type used when none is given.
pub const STRING_DATA_TYPE: &str = "http://www.w3.org/2001/XMLSchema#string";

fn default_data_type() -> String {
    STRING_DATA_TYPE.to_string()
}

/// A named, typed, multi-valued request attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute identifier.
    pub id: String,
    /// Data type URI.
    #[serde(default = "default_data_type")]
    pub data_type: String,
    /// Who asserted the attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Attribute values.
    #[serde(default)]
    pub values: Vec<String>,
}

impl Attribute {
    /// Creates a string-typed attribute with a single value.
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data_type: default_data_type(),
            issuer: None,
            values: vec![value.into()],
        }
    }

    /// Sets the data type.
    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = data_type.into();
        self
    }

    /// Sets the issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Appends a value.
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.values.push(value.into());
        self
    }

    /// First value, if any.
    pub fn first_value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

/// Attributes of one request category, in insertion order, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Attribute>", into = "Vec<Attribute>")]
pub struct AttributeSet {
    attributes: IndexMap<String, Attribute>,
}

impl AttributeSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an attribute, replacing any attribute with the same id.
    pub fn insert(&mut self, attribute: Attribute) {
        self.attributes.insert(attribute.id.clone(), attribute);
    }

    /// Adds an attribute without disturbing what is already present.
    ///
    /// A new id is appended. For an existing id of the same data type, values
    /// not yet present are appended. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns `PipError::Conflict` if the id exists with another data type.
    pub fn merge(&mut self, attribute: Attribute) -> Result<bool, PipError> {
        match self.attributes.get_mut(&attribute.id) {
            None => {
                self.attributes.insert(attribute.id.clone(), attribute);
                Ok(true)
            }
            Some(existing) if existing.data_type != attribute.data_type => {
                Err(PipError::Conflict {
                    attribute_id: attribute.id,
                    existing: existing.data_type.clone(),
                    attempted: attribute.data_type,
                })
            }
            Some(existing) => {
                let mut changed = false;
                for value in attribute.values {
                    if !existing.values.contains(&value) {
                        existing.values.push(value);
                        changed = true;
                    }
                }
                Ok(changed)
            }
        }
    }

    /// Looks up an attribute by id.
    pub fn get(&self, id: &str) -> Option<&Attribute> {
        self.attributes.get(id)
    }

    /// First value of the attribute with the given id.
    pub fn first_value(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(Attribute::first_value)
    }

    /// Iterates attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl From<Vec<Attribute>> for AttributeSet {
    fn from(attributes: Vec<Attribute>) -> Self {
        let mut set = Self::new();
        for attribute in attributes {
            set.insert(attribute);
        }
        set
    }
}

impl From<AttributeSet> for Vec<Attribute> {
    fn from(set: AttributeSet) -> Self {
        set.attributes.into_values().collect()
    }
}

impl FromIterator<Attribute> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

/// One authorization decision request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Request identifier.
    pub request_id: String,
    /// Identity of the requester (the policy enforcement point).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Subject attributes.
    #[serde(default)]
    pub subject: AttributeSet,
    /// Resource attributes, one set per resource.
    #[serde(default)]
    pub resources: Vec<AttributeSet>,
    /// Action attributes.
    #[serde(default)]
    pub action: AttributeSet,
    /// Environment attributes.
    #[serde(default)]
    pub environment: AttributeSet,
}

impl AuthorizationRequest {
    /// Starts building a request.
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Request identifier.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Requester identity.
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// First value of the first resource id attribute across all resources.
    pub fn resource_id(&self) -> Option<&str> {
        self.resources
            .iter()
            .find_map(|resource| resource.first_value(RESOURCE_ID))
    }
}

/// Builder for [`AuthorizationRequest`].
#[derive(Debug, Default)]
pub struct RequestBuilder {
    request_id: Option<String>,
    issuer: Option<String>,
    subject: AttributeSet,
    resources: Vec<AttributeSet>,
    action: AttributeSet,
    environment: AttributeSet,
}

impl RequestBuilder {
    /// Sets the request id. A UUID is generated when unset.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Sets the requester identity.
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Adds a subject attribute.
    pub fn subject(mut self, attribute: Attribute) -> Self {
        self.subject.insert(attribute);
        self
    }

    /// Adds a resource attribute set.
    pub fn resource(mut self, resource: AttributeSet) -> Self {
        self.resources.push(resource);
        self
    }

    /// Adds an attribute to the first resource, creating it if needed.
    pub fn resource_attribute(mut self, attribute: Attribute) -> Self {
        if self.resources.is_empty() {
            self.resources.push(AttributeSet::new());
        }
        self.resources[0].insert(attribute);
        self
    }

    /// Adds an action attribute.
    pub fn action(mut self, attribute: Attribute) -> Self {
        self.action.insert(attribute);
        self
    }

    /// Adds an environment attribute.
    pub fn environment(mut self, attribute: Attribute) -> Self {
        self.environment.insert(attribute);
        self
    }

    /// Builds the request.
    pub fn build(self) -> AuthorizationRequest {
        AuthorizationRequest {
            request_id: self
                .request_id
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            issuer: self.issuer,
            subject: self.subject,
            resources: self.resources,
            action: self.action,
            environment: self.environment,
        }
    }
}
