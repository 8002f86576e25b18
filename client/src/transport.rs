//! Transport collaborator seam and the batch envelope.
//!
//! The coordinator never speaks HTTP itself. It hands fully-formed
//! envelopes to a [`Transport`] implementation and interprets the
//! response. Everything transport-specific — connection handling,
//! retries, timeouts, authentication — belongs to the implementor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use thiserror::Error;

/// Opaque error reported by a transport implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Wrap a transport-level failure description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The network collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request and resolve with the decoded JSON response.
    async fn send(
        &self,
        method: &str,
        path: &str,
        body: Json,
    ) -> std::result::Result<Json, TransportError>;
}

/// One entry in a batch envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubRequest {
    /// HTTP-style method of the sub-request
    pub method: String,
    /// Server path the sub-request addresses
    pub path: String,
    /// Sub-request body; `Null` for bodiless methods
    pub body: Json,
}

impl SubRequest {
    /// Build a sub-request.
    pub fn new(method: impl Into<String>, path: impl Into<String>, body: Json) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body,
        }
    }
}

/// Bundle sub-requests into one envelope body.
pub(crate) fn envelope(requests: &[SubRequest]) -> Json {
    json!({ "requests": requests })
}

/// Outcome of one sub-request within a batch response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SubOutcome {
    /// The sub-request succeeded with this payload
    Success(Json),
    /// The server rejected the sub-request
    Failure(String),
}

/// Decode a batch response into per-sub-request outcomes.
///
/// Two response shapes are accepted: a positional array of outcome
/// objects, or a map keyed by each sub-request's identity — the record's
/// real identity, or its temporary local id when the record was newborn
/// when the envelope was built. `keys` carries those identities in
/// sub-request order.
pub(crate) fn decode_batch_response(
    response: &Json,
    keys: &[String],
) -> Result<Vec<SubOutcome>, TransportError> {
    match response {
        Json::Array(entries) => {
            if entries.len() != keys.len() {
                return Err(TransportError::new(format!(
                    "batch response has {} entries, expected {}",
                    entries.len(),
                    keys.len()
                )));
            }
            Ok(entries.iter().map(decode_outcome).collect())
        }
        Json::Object(map) => keys
            .iter()
            .map(|key| {
                map.get(key)
                    .map(decode_outcome)
                    .ok_or_else(|| {
                        TransportError::new(format!("batch response is missing entry '{key}'"))
                    })
            })
            .collect(),
        _ => Err(TransportError::new(
            "batch response is neither an array nor a map",
        )),
    }
}

fn decode_outcome(entry: &Json) -> SubOutcome {
    if let Some(success) = entry.get("success") {
        return SubOutcome::Success(success.clone());
    }
    if let Some(error) = entry.get("error") {
        let message = error
            .get("error")
            .and_then(Json::as_str)
            .unwrap_or("unspecified server error");
        let code = error.get("code").and_then(Json::as_i64);
        return SubOutcome::Failure(match code {
            Some(code) => format!("{message} (code {code})"),
            None => message.to_string(),
        });
    }
    SubOutcome::Failure("malformed batch response entry".to_string())
}
