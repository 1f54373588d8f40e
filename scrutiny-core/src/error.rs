//! Error types for SCRUTINY operations

use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Location not found: {location}")]
    NotFound { location: String },

    #[error("Write to {location} failed: {reason}")]
    WriteFailed { location: String, reason: String },

    #[error("Read from {location} failed: {reason}")]
    ReadFailed { location: String, reason: String },
}

/// Schema metadata errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Column index {index} out of range for {len} columns")]
    OutOfRange { index: usize, len: usize },
}

/// Partial payload errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Invalid schema for payload {kind} id={id}: {reason}")]
    InvalidSchema {
        kind: String,
        id: String,
        reason: String,
    },
}

/// Schedule registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Schedule request not found: {request_id}")]
    NotFound { request_id: Uuid },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all SCRUTINY errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScrutinyError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for SCRUTINY operations.
pub type ScrutinyResult<T> = Result<T, ScrutinyError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            location: "modelA-data.jsonl".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("not found"));
        assert!(msg.contains("modelA-data.jsonl"));
    }

    #[test]
    fn test_storage_error_display_write_failed() {
        let err = StorageError::WriteFailed {
            location: "modelA-data.jsonl".to_string(),
            reason: "disk full".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("modelA-data.jsonl"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_schema_error_display_out_of_range() {
        let err = SchemaError::OutOfRange { index: 7, len: 3 };
        let msg = format!("{}", err);
        assert!(msg.contains("7"));
        assert!(msg.contains("3"));
    }

    #[test]
    fn test_payload_error_display_invalid_schema() {
        let err = PayloadError::InvalidSchema {
            kind: "request".to_string(),
            id: "abc-1".to_string(),
            reason: "unknown feature 'x'".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("request"));
        assert!(msg.contains("abc-1"));
        assert!(msg.contains("unknown feature"));
    }

    #[test]
    fn test_schedule_error_display_not_found() {
        let err = ScheduleError::NotFound {
            request_id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_scrutiny_error_from_variants() {
        let storage = ScrutinyError::from(StorageError::NotFound {
            location: "x".to_string(),
        });
        assert!(matches!(storage, ScrutinyError::Storage(_)));

        let schema = ScrutinyError::from(SchemaError::OutOfRange { index: 1, len: 0 });
        assert!(matches!(schema, ScrutinyError::Schema(_)));

        let payload = ScrutinyError::from(PayloadError::InvalidSchema {
            kind: "response".to_string(),
            id: "1".to_string(),
            reason: "bad".to_string(),
        });
        assert!(matches!(payload, ScrutinyError::Payload(_)));

        let schedule = ScrutinyError::from(ScheduleError::NotFound {
            request_id: Uuid::nil(),
        });
        assert!(matches!(schedule, ScrutinyError::Schedule(_)));

        let config = ScrutinyError::from(ConfigError::InvalidValue {
            field: "storage".to_string(),
            value: "tape".to_string(),
            reason: "unknown backend".to_string(),
        });
        assert!(matches!(config, ScrutinyError::Config(_)));
    }
}
