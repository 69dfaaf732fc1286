use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Field-level validation errors from a rejected command. The inner value
/// is the server reply's `errors` payload, untransformed, so callers see
/// exactly what the server said.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("validation failed: {0}")]
pub struct ValidationErrors(pub Value);

/// Payload of a rejected join handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRejection {
    pub reason: String,
}
