//! Wire codecs for the authorization endpoint.
//!
//! A [`MessageCodec`] turns request bytes into an [`AuthorizationRequest`]
//! and a [`FinalResult`] back into bytes. [`JsonCodec`] is the built-in
//! implementation.

use arbiter_pdp::{
    AttributeSet, AuthorizationRequest, Decision, FinalResult, Obligation, StatusCode,
};
use arbiter_telemetry::logging::targets;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

/// The request body could not be turned into an authorization request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// No body was sent.
    #[error("request body is empty")]
    Empty,

    /// The body is not a well-formed message.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The body is well-formed but not an acceptable request.
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// A result could not be rendered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unable to encode response: {0}")]
pub struct EncodeError(pub String);

/// Converts between wire messages and the decision point's types.
pub trait MessageCodec: Send + Sync {
    /// Media type of encoded messages.
    fn content_type(&self) -> &'static str;

    /// Decodes a request body.
    fn decode(&self, body: &[u8]) -> Result<AuthorizationRequest, DecodeError>;

    /// Encodes a final result.
    fn encode_result(&self, result: &FinalResult) -> Result<Bytes, EncodeError>;

    /// Encodes the fault answered for an undecodable request.
    fn encode_fault(&self, error: &DecodeError) -> Bytes;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonRequest {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    subject: AttributeSet,
    #[serde(default)]
    resources: Vec<AttributeSet>,
    #[serde(default)]
    action: AttributeSet,
    #[serde(default)]
    environment: AttributeSet,
}

#[derive(Debug, Serialize)]
struct JsonStatus<'a> {
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct JsonResponse<'a> {
    response_id: &'a str,
    in_response_to: &'a str,
    issuer: &'a str,
    issue_instant: DateTime<Utc>,
    decision: Decision,
    status: JsonStatus<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_id: Option<&'a str>,
    #[serde(skip_serializing_if = "no_obligations")]
    obligations: &'a [Obligation],
}

#[allow(clippy::ref_option_ref, clippy::trivially_copy_pass_by_ref)]
fn no_obligations(obligations: &&[Obligation]) -> bool {
    obligations.is_empty()
}

#[derive(Debug, Serialize)]
struct JsonFault<'a> {
    fault: JsonFaultBody<'a>,
}

#[derive(Debug, Serialize)]
struct JsonFaultBody<'a> {
    code: &'static str,
    message: &'a str,
}

/// JSON request/response codec.
///
/// A request is an object with optional `request_id` and `issuer` and the
/// attribute categories `subject`, `resources`, `action` and `environment`,
/// each a list of `{id, data_type, issuer, values}` attributes. A missing
/// `request_id` is generated.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    entity_id: String,
}

impl JsonCodec {
    /// Creates a codec that signs responses with `entity_id`.
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
        }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new("arbiter")
    }
}

impl MessageCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn decode(&self, body: &[u8]) -> Result<AuthorizationRequest, DecodeError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }

        let wire: JsonRequest =
            serde_json::from_slice(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if wire.request_id.as_deref().is_some_and(str::is_empty) {
            return Err(DecodeError::Invalid("request_id must not be empty".to_string()));
        }

        let request = AuthorizationRequest {
            request_id: wire
                .request_id
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            issuer: wire.issuer,
            subject: wire.subject,
            resources: wire.resources,
            action: wire.action,
            environment: wire.environment,
        };

        debug!(
            target: targets::PROTOCOL,
            request_id = %request.request_id,
            issuer = request.issuer.as_deref().unwrap_or_default(),
            "decoded authorization request"
        );
        trace!(target: targets::PROTOCOL, body = %String::from_utf8_lossy(body), "incoming message");
        Ok(request)
    }

    fn encode_result(&self, result: &FinalResult) -> Result<Bytes, EncodeError> {
        let outcome = &result.outcome;
        let response = JsonResponse {
            response_id: &result.response_id,
            in_response_to: &result.request_id,
            issuer: &self.entity_id,
            issue_instant: result.completed_at,
            decision: outcome.decision,
            status: JsonStatus {
                code: outcome.status.code.as_urn(),
                message: outcome.status.message.as_deref(),
            },
            resource_id: outcome.resource_id.as_deref(),
            obligations: &outcome.obligations,
        };

        let body = serde_json::to_vec(&response).map_err(|e| EncodeError(e.to_string()))?;
        trace!(
            target: targets::PROTOCOL,
            response_id = %result.response_id,
            body = %String::from_utf8_lossy(&body),
            "outgoing message"
        );
        Ok(Bytes::from(body))
    }

    fn encode_fault(&self, error: &DecodeError) -> Bytes {
        let message = error.to_string();
        let fault = JsonFault {
            fault: JsonFaultBody {
                code: StatusCode::SyntaxError.as_urn(),
                message: &message,
            },
        };
        debug!(target: targets::PROTOCOL, error = %message, "answering with fault");
        serde_json::to_vec(&fault).map_or_else(
            |_| Bytes::from_static(br#"{"fault":{"code":"urn:oasis:names:tc:xacml:1.0:status:syntax-error"}}"#),
            Bytes::from,
        )
    }
}
