//! SCRUTINY Core - Data Types
//!
//! Pure data structures shared by every other crate: the column schema with
//! its display-name cache, the dataframe (observation table), cell values,
//! and the error taxonomy. No storage or scheduling logic lives here.

pub mod dataframe;
pub mod error;
pub mod schema;
pub mod value;

pub use dataframe::{Dataframe, TAG_SYNTHETIC, TAG_UNLABELED};
pub use error::{
    ConfigError, PayloadError, ScheduleError, SchemaError, ScrutinyError, ScrutinyResult,
    StorageError,
};
pub use schema::{
    ColumnDescriptor, SchemaMetadata, DEFAULT_INPUT_TENSOR_NAME, DEFAULT_OUTPUT_TENSOR_NAME,
};
pub use value::{ColumnDomain, ColumnRole, ColumnType, Value};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Opaque id for a scheduled metric request. UUIDv7 embeds a Unix timestamp,
/// keeping ids naturally sortable by creation time.
pub type RequestId = Uuid;

/// Generate a new request id (timestamp-sortable UUIDv7).
pub fn new_request_id() -> RequestId {
    Uuid::now_v7()
}

/// SHA-256 digest of content as a lowercase hex string.
///
/// Used as the change fingerprint for stored model data: two reads with the
/// same digest are guaranteed to contain the same bytes.
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
