//! Policy information points.
//!
//! A PIP adds attributes to a request before evaluation. PIPs run strictly in
//! registration order and only see the request through an
//! [`EnrichmentContext`], which can add attributes and values but never
//! remove or replace what the request or an earlier PIP put there.

use async_trait::async_trait;

use crate::error::PipError;
use crate::request::{Attribute, AttributeSet, AuthorizationRequest};

/// Add-only view of a request during enrichment.
#[derive(Debug)]
pub struct EnrichmentContext<'a> {
    request: &'a mut AuthorizationRequest,
    added: usize,
}

impl<'a> EnrichmentContext<'a> {
    /// Wraps a request for enrichment.
    pub fn new(request: &'a mut AuthorizationRequest) -> Self {
        Self { request, added: 0 }
    }

    /// Read access to the request as enriched so far.
    pub fn request(&self) -> &AuthorizationRequest {
        self.request
    }

    /// Number of attributes or values added through this context.
    pub fn added(&self) -> usize {
        self.added
    }

    /// Adds a subject attribute.
    ///
    /// # Errors
    ///
    /// Returns `PipError::Conflict` if the attribute exists with another data type.
    pub fn add_subject_attribute(&mut self, attribute: Attribute) -> Result<(), PipError> {
        let changed = self.request.subject.merge(attribute)?;
        self.note(changed);
        Ok(())
    }

    /// Adds an attribute to the first resource, creating the resource if the
    /// request has none.
    ///
    /// # Errors
    ///
    /// Returns `PipError::Conflict` if the attribute exists with another data type.
    pub fn add_resource_attribute(&mut self, attribute: Attribute) -> Result<(), PipError> {
        if self.request.resources.is_empty() {
            self.request.resources.push(AttributeSet::new());
        }
        let changed = self.request.resources[0].merge(attribute)?;
        self.note(changed);
        Ok(())
    }

    /// Adds an action attribute.
    ///
    /// # Errors
    ///
    /// Returns `PipError::Conflict` if the attribute exists with another data type.
    pub fn add_action_attribute(&mut self, attribute: Attribute) -> Result<(), PipError> {
        let changed = self.request.action.merge(attribute)?;
        self.note(changed);
        Ok(())
    }

    /// Adds an environment attribute.
    ///
    /// # Errors
    ///
    /// Returns `PipError::Conflict` if the attribute exists with another data type.
    pub fn add_environment_attribute(&mut self, attribute: Attribute) -> Result<(), PipError> {
        let changed = self.request.environment.merge(attribute)?;
        self.note(changed);
        Ok(())
    }

    fn note(&mut self, changed: bool) {
        if changed {
            self.added += 1;
        }
    }
}

/// Supplies additional request attributes before evaluation.
#[async_trait]
pub trait PolicyInformationPoint: Send + Sync {
    /// Stable identifier used in logs and failure reports.
    fn id(&self) -> &str;

    /// Called once when the service starts.
    async fn start(&self) -> Result<(), PipError> {
        Ok(())
    }

    /// Called once when the service shuts down.
    async fn stop(&self) -> Result<(), PipError> {
        Ok(())
    }

    /// Adds attributes to the request.
    async fn enrich(&self, context: &mut EnrichmentContext<'_>) -> Result<(), PipError>;
}

/// A synchronous PIP built from a closure.
pub struct FnPip<F> {
    id: String,
    enrich: F,
}

impl<F> FnPip<F>
where
    F: Fn(&mut EnrichmentContext<'_>) -> Result<(), PipError> + Send + Sync,
{
    /// Creates a PIP with the given id.
    pub fn new(id: impl Into<String>, enrich: F) -> Self {
        Self {
            id: id.into(),
            enrich,
        }
    }
}

impl<F> std::fmt::Debug for FnPip<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPip").field("id", &self.id).finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> PolicyInformationPoint for FnPip<F>
where
    F: Fn(&mut EnrichmentContext<'_>) -> Result<(), PipError> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn enrich(&self, context: &mut EnrichmentContext<'_>) -> Result<(), PipError> {
        (self.enrich)(context)
    }
}
