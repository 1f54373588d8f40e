//! Data source: dataframe persistence over the observation store
//!
//! Encodes completed observations for the raw store and rehydrates them for
//! metric computations. Each model owns three locations: the primary data
//! stream (one JSON array of cell values per line), the internal stream
//! (one `tag,id,timestamp` row per line, paired line-for-line with the
//! data stream), and a metadata record holding the serialized schema.

use dashmap::DashMap;
use scrutiny_core::error::{SchemaError, StorageError};
use scrutiny_core::{Dataframe, SchemaMetadata, ScrutinyResult, Timestamp, Value};
use scrutiny_storage::ObservationStore;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, RwLock};

/// Bridges schema-aligned dataframes and the line-oriented store.
pub struct DataSource {
    store: Arc<dyn ObservationStore>,
    batch_size: usize,
    known_models: RwLock<BTreeSet<String>>,
    /// Per-model write locks. A save touches two paired streams plus the
    /// metadata record; interleaved writers would misalign the pairing.
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DataSource {
    pub fn new(store: Arc<dyn ObservationStore>, batch_size: usize) -> Self {
        DataSource {
            store,
            batch_size,
            known_models: RwLock::new(BTreeSet::new()),
            write_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObservationStore> {
        &self.store
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Persist a dataframe for `model_id`: appends to the model's streams
    /// when they exist, creates them (and the metadata record) otherwise.
    pub fn save_dataframe(&self, df: &Dataframe, model_id: &str) -> ScrutinyResult<()> {
        if df.is_empty() {
            return Ok(());
        }

        let lock = self
            .write_locks
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // Arity drift against the persisted schema corrupts every later
        // read, so reject it here rather than at read time.
        if let Ok(metadata) = self.get_metadata(model_id) {
            if metadata.column_count() != df.schema().column_count() {
                return Err(SchemaError::InvalidArgument {
                    reason: format!(
                        "dataframe has {} columns, persisted schema for '{}' has {}",
                        df.schema().column_count(),
                        model_id,
                        metadata.column_count()
                    ),
                }
                .into());
            }
        }

        let data_location = self.store.data_filename(model_id);
        let mut data_lines = String::new();
        for row in df.rows() {
            let line = serde_json::to_string(row).map_err(|e| StorageError::WriteFailed {
                location: data_location.clone(),
                reason: format!("row does not encode: {}", e),
            })?;
            data_lines.push_str(&line);
            data_lines.push('\n');
        }

        let mut internal_lines = String::new();
        for i in 0..df.len() {
            internal_lines.push_str(&format!(
                "{},{},{}\n",
                df.tags()[i],
                df.ids()[i],
                df.timestamps()[i].to_rfc3339()
            ));
        }

        if self.store.data_exists(model_id) {
            self.store.append_data(data_lines.as_bytes(), model_id)?;
            if let Err(e) = self.store.append(
                internal_lines.as_bytes(),
                &self.store.internal_data_filename(model_id),
            ) {
                // The data stream already grew; shrink it back so the two
                // streams stay line-for-line aligned.
                self.rollback_data_suffix(model_id, data_lines.as_bytes());
                return Err(e);
            }
        } else {
            tracing::info!(model_id, rows = df.len(), "Creating observation streams");
            // Internal stream first: a half-created model (internal stream
            // without data) is invisible to data_exists and gets
            // overwritten whole on retry.
            self.store.save(
                internal_lines.as_bytes(),
                &self.store.internal_data_filename(model_id),
            )?;
            self.store.save_data(data_lines.as_bytes(), model_id)?;
        }

        if !self.has_metadata(model_id) {
            self.save_metadata(df.schema(), model_id)?;
        }

        let mut known = self
            .known_models
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        known.insert(model_id.to_string());
        Ok(())
    }

    /// Remove a just-appended suffix from the data stream after the paired
    /// internal append failed. Runs under the model's write lock.
    fn rollback_data_suffix(&self, model_id: &str, suffix: &[u8]) {
        let location = self.store.data_filename(model_id);
        match self.store.read(&location) {
            Ok(current) if current.ends_with(suffix) => {
                let restored = &current[..current.len() - suffix.len()];
                if let Err(e) = self.store.save(restored, &location) {
                    tracing::error!(model_id, error = %e, "Data stream rollback failed");
                }
            }
            Ok(_) => {
                tracing::error!(model_id, "Data stream rollback skipped: tail does not match the appended rows");
            }
            Err(e) => {
                tracing::error!(model_id, error = %e, "Data stream rollback failed");
            }
        }
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Trailing default-batch rows for the model.
    pub fn get_dataframe(&self, model_id: &str) -> ScrutinyResult<Dataframe> {
        self.get_dataframe_batch(model_id, self.batch_size)
    }

    /// Trailing `batch_size` rows for the model, oldest first. The data and
    /// internal streams are paired from the start before the batch is cut,
    /// so a length mismatch between them can never shift a row onto its
    /// neighbor's id and tag.
    pub fn get_dataframe_batch(&self, model_id: &str, batch_size: usize) -> ScrutinyResult<Dataframe> {
        let metadata = self.get_metadata(model_id)?;
        let data = self.store.read_data(model_id)?;
        let internal = self
            .store
            .read(&self.store.internal_data_filename(model_id))?;
        self.decode_rows(model_id, metadata, &data, &internal, batch_size)
    }

    /// Trailing `batch_size` rows whose tag is in `tags`.
    pub fn get_dataframe_filtered(
        &self,
        model_id: &str,
        batch_size: usize,
        tags: &HashSet<String>,
    ) -> ScrutinyResult<Dataframe> {
        let metadata = self.get_metadata(model_id)?;
        let (data, internal) = self.store.read_with_tags(model_id, batch_size, tags)?;
        self.decode_rows(model_id, metadata, &data, &internal, batch_size)
    }

    fn decode_rows(
        &self,
        model_id: &str,
        metadata: SchemaMetadata,
        data: &[u8],
        internal: &[u8],
        max_rows: usize,
    ) -> ScrutinyResult<Dataframe> {
        let location = self.store.data_filename(model_id);
        let read_failed = |reason: String| StorageError::ReadFailed {
            location: location.clone(),
            reason,
        };

        let data_text = std::str::from_utf8(data)
            .map_err(|e| read_failed(format!("content is not valid UTF-8: {}", e)))?;
        let internal_text = std::str::from_utf8(internal)
            .map_err(|e| read_failed(format!("content is not valid UTF-8: {}", e)))?;

        // Pair line-for-line from the start; a longer stream's tail has no
        // counterpart and is skipped, as in tag-filtered reads.
        let pairs: Vec<(&str, &str)> = data_text.lines().zip(internal_text.lines()).collect();
        let start = pairs.len().saturating_sub(max_rows);

        let mut df = Dataframe::from_schema(metadata);
        for &(data_line, internal_line) in &pairs[start..] {
            let row: Vec<Value> = serde_json::from_str(data_line)
                .map_err(|e| read_failed(format!("row does not decode: {}", e)))?;

            let mut fields = internal_line.splitn(3, ',');
            let tag = fields
                .next()
                .ok_or_else(|| read_failed("internal row is empty".to_string()))?;
            let id = fields
                .next()
                .ok_or_else(|| read_failed("internal row has no id".to_string()))?;
            let raw_ts = fields
                .next()
                .ok_or_else(|| read_failed("internal row has no timestamp".to_string()))?;
            let timestamp: Timestamp = chrono::DateTime::parse_from_rfc3339(raw_ts)
                .map_err(|e| read_failed(format!("bad timestamp '{}': {}", raw_ts, e)))?
                .with_timezone(&chrono::Utc);

            df.push_row(row, id, tag, timestamp)?;
        }
        Ok(df)
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    pub fn has_metadata(&self, model_id: &str) -> bool {
        self.store
            .file_exists(&self.store.metadata_filename(model_id))
    }

    pub fn get_metadata(&self, model_id: &str) -> ScrutinyResult<SchemaMetadata> {
        let location = self.store.metadata_filename(model_id);
        let bytes = self.store.read(&location)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::ReadFailed {
                location,
                reason: format!("metadata does not decode: {}", e),
            }
            .into()
        })
    }

    pub fn save_metadata(&self, schema: &SchemaMetadata, model_id: &str) -> ScrutinyResult<()> {
        let location = self.store.metadata_filename(model_id);
        let bytes = serde_json::to_vec(schema).map_err(|e| StorageError::WriteFailed {
            location: location.clone(),
            reason: format!("metadata does not encode: {}", e),
        })?;
        self.store.save(&bytes, &location)
    }

    /// Bulk-apply display aliases to the model's persisted schema by raw
    /// column name. Unknown names are ignored. Returns the updated schema.
    pub fn apply_name_mapping(
        &self,
        model_id: &str,
        name_to_alias: &std::collections::HashMap<String, String>,
    ) -> ScrutinyResult<SchemaMetadata> {
        let mut metadata = self.get_metadata(model_id)?;
        metadata.apply_aliases(name_to_alias);
        self.save_metadata(&metadata, model_id)?;
        Ok(metadata)
    }

    // ========================================================================
    // MODEL REGISTRY
    // ========================================================================

    /// Models whose observation data is present in the store, in sorted
    /// order.
    pub fn get_verified_models(&self) -> Vec<String> {
        let known = self
            .known_models
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        known
            .iter()
            .filter(|m| self.store.data_exists(m))
            .cloned()
            .collect()
    }

    /// Content fingerprint of the model's primary stream.
    pub fn last_modified(&self, model_id: &str) -> ScrutinyResult<String> {
        self.store.last_modified(model_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use scrutiny_core::error::ScrutinyError;
    use scrutiny_core::{ColumnDomain, ColumnType, TAG_SYNTHETIC, TAG_UNLABELED};
    use scrutiny_storage::{MemoryStore, INTERNAL_DATA_FILENAME};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Delegating store that fails appends to internal streams on demand.
    struct InternalAppendFault {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    impl InternalAppendFault {
        fn new() -> Self {
            InternalAppendFault {
                inner: MemoryStore::new("data.jsonl".to_string()),
                fail: AtomicBool::new(false),
            }
        }
    }

    impl ObservationStore for InternalAppendFault {
        fn save(&self, data: &[u8], location: &str) -> ScrutinyResult<()> {
            self.inner.save(data, location)
        }

        fn append(&self, data: &[u8], location: &str) -> ScrutinyResult<()> {
            if self.fail.load(Ordering::Relaxed) && location.ends_with(INTERNAL_DATA_FILENAME) {
                return Err(StorageError::WriteFailed {
                    location: location.to_string(),
                    reason: "injected fault".to_string(),
                }
                .into());
            }
            self.inner.append(data, location)
        }

        fn read(&self, location: &str) -> ScrutinyResult<Vec<u8>> {
            self.inner.read(location)
        }

        fn file_exists(&self, location: &str) -> bool {
            self.inner.file_exists(location)
        }

        fn data_suffix(&self) -> &str {
            self.inner.data_suffix()
        }
    }

    fn datasource() -> DataSource {
        let store = Arc::new(MemoryStore::new("data.jsonl".to_string()));
        DataSource::new(store, 100)
    }

    fn schema() -> SchemaMetadata {
        let mut schema = SchemaMetadata::empty();
        schema.add_input("f", ColumnType::Int, false, ColumnDomain::Empty);
        schema.add_output("y", ColumnType::Int);
        schema
    }

    fn dataframe(rows: &[(i64, i64, &str, &str)]) -> Dataframe {
        let mut df = Dataframe::from_schema(schema());
        for (f, y, id, tag) in rows {
            df.push_row(
                vec![Value::Int(*f), Value::Int(*y)],
                id.to_string(),
                tag.to_string(),
                chrono::Utc::now(),
            )
            .unwrap();
        }
        df
    }

    #[test]
    fn test_save_then_get_roundtrip() {
        let ds = datasource();
        let df = dataframe(&[(1, 10, "a", TAG_UNLABELED), (2, 20, "b", TAG_UNLABELED)]);
        ds.save_dataframe(&df, "modelA").unwrap();

        let loaded = ds.get_dataframe("modelA").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.ids(), &["a".to_string(), "b".to_string()]);
        assert_eq!(loaded.row(0).unwrap(), &[Value::Int(1), Value::Int(10)]);
        assert_eq!(loaded.schema().column_count(), 2);
    }

    #[test]
    fn test_second_save_appends() {
        let ds = datasource();
        ds.save_dataframe(&dataframe(&[(1, 10, "a", TAG_UNLABELED)]), "m")
            .unwrap();
        ds.save_dataframe(&dataframe(&[(2, 20, "b", TAG_UNLABELED)]), "m")
            .unwrap();

        let loaded = ds.get_dataframe("m").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.ids(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_batch_returns_trailing_rows() {
        let ds = datasource();
        let df = dataframe(&[
            (1, 10, "a", TAG_UNLABELED),
            (2, 20, "b", TAG_UNLABELED),
            (3, 30, "c", TAG_UNLABELED),
        ]);
        ds.save_dataframe(&df, "m").unwrap();

        let loaded = ds.get_dataframe_batch("m", 2).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.ids(), &["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_filtered_read_honors_tags() {
        let ds = datasource();
        let df = dataframe(&[
            (1, 10, "a", TAG_UNLABELED),
            (2, 20, "b", TAG_SYNTHETIC),
            (3, 30, "c", TAG_UNLABELED),
        ]);
        ds.save_dataframe(&df, "m").unwrap();

        let tags: HashSet<String> = [TAG_UNLABELED.to_string()].into_iter().collect();
        let loaded = ds.get_dataframe_filtered("m", 10, &tags).unwrap();
        assert_eq!(loaded.ids(), &["a".to_string(), "c".to_string()]);
        assert!(loaded.tags().iter().all(|t| t == TAG_UNLABELED));
    }

    #[test]
    fn test_failed_internal_append_rolls_back_data_stream() {
        let store = Arc::new(InternalAppendFault::new());
        let ds = DataSource::new(Arc::clone(&store) as Arc<dyn ObservationStore>, 100);
        ds.save_dataframe(&dataframe(&[(1, 10, "a", TAG_UNLABELED)]), "m")
            .unwrap();

        store.fail.store(true, Ordering::Relaxed);
        let result = ds.save_dataframe(&dataframe(&[(2, 20, "b", TAG_UNLABELED)]), "m");
        assert!(result.is_err());
        store.fail.store(false, Ordering::Relaxed);

        // The half-written row is gone and attribution stays intact.
        let df = ds.get_dataframe_batch("m", 1).unwrap();
        assert_eq!(df.ids(), &["a".to_string()]);
        assert_eq!(df.row(0).unwrap(), &[Value::Int(1), Value::Int(10)]);

        // A retry lands cleanly after the rollback.
        ds.save_dataframe(&dataframe(&[(2, 20, "b", TAG_UNLABELED)]), "m")
            .unwrap();
        let df = ds.get_dataframe("m").unwrap();
        assert_eq!(df.ids(), &["a".to_string(), "b".to_string()]);
        assert_eq!(df.row(1).unwrap(), &[Value::Int(2), Value::Int(20)]);
    }

    #[test]
    fn test_batch_pairs_from_stream_start_on_length_mismatch() {
        let ds = datasource();
        ds.save_dataframe(&dataframe(&[(1, 10, "a", TAG_UNLABELED)]), "m")
            .unwrap();
        // Grow the data stream without its tag row, as an external writer
        // bypassing the per-model lock could.
        ds.store().append_data(b"[2,20]\n", "m").unwrap();

        // The unpaired tail is skipped; row "a" keeps its own id and tag.
        let df = ds.get_dataframe_batch("m", 1).unwrap();
        assert_eq!(df.ids(), &["a".to_string()]);
        assert_eq!(df.row(0).unwrap(), &[Value::Int(1), Value::Int(10)]);
    }

    #[test]
    fn test_get_missing_model_is_not_found() {
        let ds = datasource();
        let result = ds.get_dataframe("ghost");
        assert!(matches!(
            result,
            Err(ScrutinyError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_metadata_persisted_on_first_save() {
        let ds = datasource();
        assert!(!ds.has_metadata("m"));
        ds.save_dataframe(&dataframe(&[(1, 10, "a", TAG_UNLABELED)]), "m")
            .unwrap();

        assert!(ds.has_metadata("m"));
        let metadata = ds.get_metadata("m").unwrap();
        assert_eq!(metadata.raw_names(), &["f".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_save_rejects_arity_drift() {
        let ds = datasource();
        ds.save_dataframe(&dataframe(&[(1, 10, "a", TAG_UNLABELED)]), "m")
            .unwrap();

        let mut wide_schema = schema();
        wide_schema.add_input("g", ColumnType::Int, false, ColumnDomain::Empty);
        let mut wide = Dataframe::from_schema(wide_schema);
        wide.push_row(
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
            "b",
            TAG_UNLABELED,
            chrono::Utc::now(),
        )
        .unwrap();

        assert!(ds.save_dataframe(&wide, "m").is_err());
    }

    #[test]
    fn test_apply_name_mapping_updates_persisted_schema() {
        let ds = datasource();
        ds.save_dataframe(&dataframe(&[(1, 10, "a", TAG_UNLABELED)]), "m")
            .unwrap();

        let mut mapping = std::collections::HashMap::new();
        mapping.insert("f".to_string(), "feature_f".to_string());
        let updated = ds.apply_name_mapping("m", &mapping).unwrap();
        assert_eq!(updated.display_name(0).unwrap(), "feature_f");

        let reloaded = ds.get_metadata("m").unwrap();
        assert_eq!(reloaded.display_name(0).unwrap(), "feature_f");
    }

    #[test]
    fn test_verified_models() {
        let ds = datasource();
        assert!(ds.get_verified_models().is_empty());
        ds.save_dataframe(&dataframe(&[(1, 10, "a", TAG_UNLABELED)]), "m2")
            .unwrap();
        ds.save_dataframe(&dataframe(&[(1, 10, "a", TAG_UNLABELED)]), "m1")
            .unwrap();
        assert_eq!(
            ds.get_verified_models(),
            vec!["m1".to_string(), "m2".to_string()]
        );
    }

    #[test]
    fn test_last_modified_changes_on_save() {
        let ds = datasource();
        ds.save_dataframe(&dataframe(&[(1, 10, "a", TAG_UNLABELED)]), "m")
            .unwrap();
        let before = ds.last_modified("m").unwrap();
        ds.save_dataframe(&dataframe(&[(2, 20, "b", TAG_UNLABELED)]), "m")
            .unwrap();
        assert_ne!(before, ds.last_modified("m").unwrap());
    }
}
