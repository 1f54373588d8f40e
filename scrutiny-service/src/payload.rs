//! Partial inference payloads
//!
//! The transport layer delivers one [`PartialPayload`] per fragment; the
//! `data` field is the raw JSON-encoded named-tensor payload emitted by the
//! model server. Decoding and schema validation happen here, at submission
//! time, so a malformed fragment is rejected before it can be held pending.

use scrutiny_core::error::PayloadError;
use scrutiny_core::{ColumnRole, ColumnType, SchemaMetadata, ScrutinyResult, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Which half of an inference call a fragment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialKind {
    Request,
    Response,
}

impl fmt::Display for PartialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialKind::Request => write!(f, "request"),
            PartialKind::Response => write!(f, "response"),
        }
    }
}

/// One asynchronously-delivered half of an inference observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialPayload {
    /// Opaque correlation id pairing request and response.
    pub id: String,
    pub kind: PartialKind,
    pub model_id: String,
    /// Raw JSON-encoded tensor payload.
    pub data: String,
}

// ============================================================================
// DECODED FORM
// ============================================================================

/// One observation's worth of named columns, decoded from a fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorPayload {
    /// Named-tensor label the columns were grouped under.
    pub tensor_name: String,
    pub names: Vec<String>,
    pub types: Vec<ColumnType>,
    pub values: Vec<Value>,
}

impl TensorPayload {
    /// Decode and validate a fragment's raw payload.
    ///
    /// Fails with `InvalidSchema` when the payload does not decode, when
    /// the name/type/value lists are not aligned, or when a value is
    /// incompatible with its declared column type.
    pub fn decode(payload: &PartialPayload) -> ScrutinyResult<TensorPayload> {
        let tensor: TensorPayload =
            serde_json::from_str(&payload.data).map_err(|e| invalid(payload, e.to_string()))?;

        if tensor.names.len() != tensor.types.len() || tensor.names.len() != tensor.values.len() {
            return Err(invalid(
                payload,
                format!(
                    "misaligned tensor lists: {} names, {} types, {} values",
                    tensor.names.len(),
                    tensor.types.len(),
                    tensor.values.len()
                ),
            )
            .into());
        }
        if tensor.names.is_empty() {
            return Err(invalid(payload, "payload carries no columns".to_string()).into());
        }
        for (i, value) in tensor.values.iter().enumerate() {
            if !value.is_compatible_with(tensor.types[i]) {
                return Err(invalid(
                    payload,
                    format!(
                        "value for column '{}' is not a {}",
                        tensor.names[i], tensor.types[i]
                    ),
                )
                .into());
            }
        }
        Ok(tensor)
    }

    /// Validate this tensor against the persisted schema for its role:
    /// the column names and types must match the schema's columns of that
    /// role, in order.
    pub fn validate_against(
        &self,
        payload: &PartialPayload,
        schema: &SchemaMetadata,
        role: ColumnRole,
    ) -> ScrutinyResult<()> {
        let indices = match role {
            ColumnRole::Input => schema.input_indices(),
            ColumnRole::Output => schema.output_indices(),
        };
        if indices.len() != self.names.len() {
            return Err(invalid(
                payload,
                format!(
                    "expected {} {:?} columns, payload has {}",
                    indices.len(),
                    role,
                    self.names.len()
                ),
            )
            .into());
        }
        for (pos, &schema_index) in indices.iter().enumerate() {
            let expected_name = schema.raw_name(schema_index)?;
            if self.names[pos] != expected_name {
                return Err(invalid(
                    payload,
                    format!(
                        "column {} is '{}', schema expects '{}'",
                        pos, self.names[pos], expected_name
                    ),
                )
                .into());
            }
            let expected_type = schema.column_type(schema_index)?;
            if !self.values[pos].is_compatible_with(expected_type) {
                return Err(invalid(
                    payload,
                    format!("value for column '{}' is not a {}", self.names[pos], expected_type),
                )
                .into());
            }
        }
        Ok(())
    }
}

fn invalid(payload: &PartialPayload, reason: String) -> PayloadError {
    PayloadError::InvalidSchema {
        kind: payload.kind.to_string(),
        id: payload.id.clone(),
        reason,
    }
}

// ============================================================================
// TESTS
// ============================================================================
