//! SCRUTINY Storage - Observation Store Trait and Backends
//!
//! Defines the persistence abstraction for raw, line-oriented observation
//! data. Each model id maps to two logical streams: the primary data stream
//! and an internal per-row tag stream, named deterministically from the
//! model id. Backends are interchangeable behind [`ObservationStore`];
//! the variant is selected from [`StorageConfig`] at process start.

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

use scrutiny_core::error::{ConfigError, StorageError};
use scrutiny_core::{content_digest, ScrutinyResult};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Default filename suffix for the primary data stream.
pub const DEFAULT_DATA_FILENAME: &str = "data.jsonl";
/// Filename suffix for the internal per-row tag stream.
pub const INTERNAL_DATA_FILENAME: &str = "internal_data.csv";
/// Filename suffix for the persisted per-model schema metadata.
pub const METADATA_FILENAME: &str = "metadata.json";

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Persistence contract shared by every backend.
///
/// Content is UTF-8 text, one row per `\n`-terminated line. Mutations on a
/// given location appear atomic to concurrent readers of that location;
/// different locations are independent.
pub trait ObservationStore: Send + Sync {
    /// Full overwrite of `location`, creating it when absent.
    fn save(&self, data: &[u8], location: &str) -> ScrutinyResult<()>;

    /// Concatenate to existing content. Appending to a non-existent
    /// location fails with `NotFound`; no implicit create. A failed append
    /// leaves the location exactly as before the call.
    fn append(&self, data: &[u8], location: &str) -> ScrutinyResult<()>;

    /// Raw content of `location`, or `NotFound`.
    fn read(&self, location: &str) -> ScrutinyResult<Vec<u8>>;

    /// Whether `location` holds any content.
    fn file_exists(&self, location: &str) -> bool;

    /// Filename suffix of the primary data stream (configurable per store).
    fn data_suffix(&self) -> &str;

    // ========================================================================
    // PROVIDED OPERATIONS (shared contract, not a base class)
    // ========================================================================

    /// Trailing `max_lines` lines of `location`, order preserved. Returns
    /// all content when fewer lines are stored.
    fn read_batch(&self, location: &str, max_lines: usize) -> ScrutinyResult<Vec<u8>> {
        let content = self.read(location)?;
        let text = utf8(&content, location)?;
        Ok(tail_lines(text, max_lines).into_bytes())
    }

    /// Read the primary data stream and its paired internal tag stream
    /// line-for-line, keeping only rows whose tag is in `tag_filter` and
    /// truncating to the trailing `max_lines` matches, most-recent-last.
    /// When the streams differ in length, pairing stops at the shorter one.
    ///
    /// Returns `(data_lines, internal_lines)`.
    fn read_with_tags(
        &self,
        model_id: &str,
        max_lines: usize,
        tag_filter: &HashSet<String>,
    ) -> ScrutinyResult<(Vec<u8>, Vec<u8>)> {
        let data_location = self.data_filename(model_id);
        let internal_location = self.internal_data_filename(model_id);

        let data = self.read(&data_location)?;
        let internal = self.read(&internal_location)?;
        let data_text = utf8(&data, &data_location)?;
        let internal_text = utf8(&internal, &internal_location)?;

        let mut data_lines = Vec::new();
        let mut internal_lines = Vec::new();
        for (data_line, internal_line) in data_text.lines().zip(internal_text.lines()) {
            // The tag is the first comma-separated field of the internal row.
            let tag = internal_line.split(',').next().unwrap_or("");
            if tag_filter.contains(tag) {
                data_lines.push(data_line);
                internal_lines.push(internal_line);
            }
        }

        let start = data_lines.len().saturating_sub(max_lines);
        Ok((
            join_lines(&data_lines[start..]).into_bytes(),
            join_lines(&internal_lines[start..]).into_bytes(),
        ))
    }

    /// Whether the model's primary data stream exists.
    fn data_exists(&self, model_id: &str) -> bool {
        self.file_exists(&self.data_filename(model_id))
    }

    /// Overwrite the model's primary data stream.
    fn save_data(&self, data: &[u8], model_id: &str) -> ScrutinyResult<()> {
        self.save(data, &self.data_filename(model_id))
    }

    /// Append to the model's primary data stream.
    fn append_data(&self, data: &[u8], model_id: &str) -> ScrutinyResult<()> {
        self.append(data, &self.data_filename(model_id))
    }

    /// Full primary data stream for the model.
    fn read_data(&self, model_id: &str) -> ScrutinyResult<Vec<u8>> {
        self.read(&self.data_filename(model_id))
    }

    /// Trailing `max_lines` of the model's primary data stream.
    fn read_data_batch(&self, model_id: &str, max_lines: usize) -> ScrutinyResult<Vec<u8>> {
        self.read_batch(&self.data_filename(model_id), max_lines)
    }

    /// Content fingerprint of the model's primary data stream. Two equal
    /// fingerprints guarantee unchanged content; this is not a wall-clock
    /// timestamp.
    fn last_modified(&self, model_id: &str) -> ScrutinyResult<String> {
        let data = self.read_data(model_id)?;
        Ok(content_digest(&data))
    }

    // ========================================================================
    // NAMING
    // ========================================================================

    fn data_filename(&self, model_id: &str) -> String {
        format!("{}-{}", model_id, self.data_suffix())
    }

    fn internal_data_filename(&self, model_id: &str) -> String {
        format!("{}-{}", model_id, INTERNAL_DATA_FILENAME)
    }

    fn metadata_filename(&self, model_id: &str) -> String {
        format!("{}-{}", model_id, METADATA_FILENAME)
    }

    fn build_data_path(&self, model_id: &str) -> PathBuf {
        PathBuf::from(self.data_filename(model_id))
    }

    fn build_internal_data_path(&self, model_id: &str) -> PathBuf {
        PathBuf::from(self.internal_data_filename(model_id))
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Which backend variant to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Concurrent in-memory map.
    Memory,
    /// Local filesystem directory.
    Filesystem,
    /// Networked volume mounted into the pod; same contract as the
    /// filesystem backend, rooted at the mount path.
    Pvc,
}

impl std::str::FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MEMORY" => Ok(StorageKind::Memory),
            "FILESYSTEM" => Ok(StorageKind::Filesystem),
            "PVC" => Ok(StorageKind::Pvc),
            _ => Err(ConfigError::InvalidValue {
                field: "storage.kind".to_string(),
                value: s.to_string(),
                reason: "expected MEMORY, FILESYSTEM or PVC".to_string(),
            }),
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Root directory for the filesystem backend, mount path for PVC.
    pub data_dir: PathBuf,
    /// Filename suffix for primary data streams.
    pub data_filename: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            data_dir: PathBuf::from("/inputs"),
            data_filename: DEFAULT_DATA_FILENAME.to_string(),
        }
    }
}

impl StorageConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// - `SCRUTINY_STORAGE_KIND`: MEMORY, FILESYSTEM or PVC (default: MEMORY)
    /// - `SCRUTINY_STORAGE_DATA_DIR`: backend root directory (default: /inputs)
    /// - `SCRUTINY_STORAGE_DATA_FILENAME`: data stream suffix (default: data.jsonl)
    pub fn from_env() -> ScrutinyResult<Self> {
        let defaults = Self::default();
        let kind = match std::env::var("SCRUTINY_STORAGE_KIND") {
            Ok(s) => s.parse::<StorageKind>()?,
            Err(_) => defaults.kind,
        };
        let data_dir = std::env::var("SCRUTINY_STORAGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let data_filename =
            std::env::var("SCRUTINY_STORAGE_DATA_FILENAME").unwrap_or(defaults.data_filename);
        Ok(Self {
            kind,
            data_dir,
            data_filename,
        })
    }
}

/// Construct the configured backend behind the shared contract.
pub fn build_store(config: &StorageConfig) -> Arc<dyn ObservationStore> {
    match config.kind {
        StorageKind::Memory => Arc::new(MemoryStore::new(config.data_filename.clone())),
        StorageKind::Filesystem | StorageKind::Pvc => Arc::new(FilesystemStore::new(
            config.data_dir.clone(),
            config.data_filename.clone(),
        )),
    }
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

fn utf8<'a>(data: &'a [u8], location: &str) -> ScrutinyResult<&'a str> {
    std::str::from_utf8(data).map_err(|e| {
        StorageError::ReadFailed {
            location: location.to_string(),
            reason: format!("content is not valid UTF-8: {}", e),
        }
        .into()
    })
}

/// Trailing `max_lines` lines of `text`, newline-terminated.
fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    join_lines(&lines[start..])
}

fn join_lines(lines: &[&str]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut joined = lines.join("\n");
    joined.push('\n');
    joined
}

// ============================================================================
// SHARED CONTRACT TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
