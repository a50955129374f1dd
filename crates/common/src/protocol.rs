//! Request and response types exchanged over the public HTTP API.
//!
//! Records travel as flat JSON objects. The sensitive field is always
//! plaintext on the wire; its sealed `<base64-ciphertext>|<key-version>`
//! form only ever exists inside the document store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A single record as returned to callers.
///
/// When a field could not be decrypted it is omitted from `fields` and an
/// entry is added to `field_errors` instead. A failed field is never
/// replaced with a placeholder string.
/// Response key holding per-field failures. Records may not use it as a field.
pub const FIELD_ERRORS_KEY: &str = "field_errors";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResponse {
    /// Record fields, including `id`.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// Per-field failures keyed by field name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_errors: BTreeMap<String, FieldError>,
}

/// Describes why one field of a record could not be returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    /// Short machine-readable error code (e.g. `"decryption_failed"`).
    pub code: String,
    /// Human-readable description. Never contains plaintext.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Query parameters accepted by `GET /items`.
///
/// `offset` and `continuation_token` are mutually exclusive. `field` and
/// `value` switch the endpoint into an equality search and must be given
/// together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    /// Maximum number of records to return.
    pub limit: Option<usize>,
    /// Number of records to skip (offset pagination).
    pub offset: Option<usize>,
    /// Opaque store-native resume token (cursor pagination).
    pub continuation_token: Option<String>,
    /// Field name for an equality search.
    pub field: Option<String>,
    /// Field value for an equality search (compared as a JSON string).
    pub value: Option<String>,
}

/// Response body for `GET /items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    /// Records on this page.
    pub items: Vec<RecordResponse>,
    /// Offset to request next when paging by offset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<usize>,
    /// Token to request next when paging by continuation token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Key rotation
// ---------------------------------------------------------------------------

/// Response body for `POST /rotate-key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateKeyResponse {
    /// The newly active key version.
    pub key_version: String,
    /// Number of records scanned by the re-encryption pass.
    pub scanned: usize,
    /// Number of records re-sealed under the new version.
    pub re_encrypted: usize,
    /// Records that could not be re-sealed and were left untouched.
    pub failures: Vec<RecordFailure>,
}

/// A record the re-encryption pass could not process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordFailure {
    /// Id of the affected record.
    pub id: String,
    /// Description of the failure.
    pub error: String,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"bad_request"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&crate::ServiceError> for ErrorResponse {
    fn from(err: &crate::ServiceError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: String,
    /// The key version currently used for new encryptions.
    pub key_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_response_flattens_fields() {
        let fields = json!({"id": "u1", "name": "Alice"})
            .as_object()
            .cloned()
            .unwrap();
        let rec = RecordResponse {
            fields,
            field_errors: BTreeMap::new(),
        };
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value, json!({"id": "u1", "name": "Alice"}));
    }

    #[test]
    fn record_response_reports_field_errors() {
        let fields = json!({"id": "u1"}).as_object().cloned().unwrap();
        let mut field_errors = BTreeMap::new();
        field_errors.insert(
            "name".to_string(),
            FieldError {
                code: "decryption_failed".into(),
                message: "unknown key version".into(),
            },
        );
        let value = serde_json::to_value(RecordResponse {
            fields,
            field_errors,
        })
        .unwrap();
        assert!(value.get("name").is_none());
        assert_eq!(value["field_errors"]["name"]["code"], "decryption_failed");
    }

    #[test]
    fn list_response_omits_absent_cursors() {
        let resp = ListResponse {
            items: vec![],
            next_offset: None,
            continuation_token: None,
        };
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({"items": []}));
    }

    #[test]
    fn error_response_from_service_error() {
        let e = ErrorResponse::from(&crate::ServiceError::Conflict("rotation in progress".into()));
        assert_eq!(e.code, "conflict");
        assert!(e.message.contains("rotation in progress"));
    }
}
