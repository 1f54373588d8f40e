//! Observation table: schema-aligned rows with ids, tags, and timestamps

use crate::error::{SchemaError, ScrutinyResult};
use crate::schema::SchemaMetadata;
use crate::value::{ColumnRole, Value};
use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Default tag for observations ingested from live inference traffic.
pub const TAG_UNLABELED: &str = "unlabeled";
/// Tag for rows injected by data-upload or generation paths.
pub const TAG_SYNTHETIC: &str = "synthetic";

/// Ordered table of completed observations for one model.
///
/// Every row is a fixed-arity tuple aligned to the current column
/// descriptors; `ids`, `tags`, and `timestamps` run parallel to `rows`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataframe {
    schema: SchemaMetadata,
    rows: Vec<Vec<Value>>,
    ids: Vec<String>,
    tags: Vec<String>,
    timestamps: Vec<Timestamp>,
}

impl Dataframe {
    /// Empty dataframe over the given schema.
    pub fn from_schema(schema: SchemaMetadata) -> Self {
        Dataframe {
            schema,
            rows: Vec::new(),
            ids: Vec::new(),
            tags: Vec::new(),
            timestamps: Vec::new(),
        }
    }

    /// Build a one-row dataframe from reconciled input/output fragments.
    /// Inputs come first in schema order, then outputs.
    pub fn from_fragments(
        schema: SchemaMetadata,
        inputs: Vec<Value>,
        outputs: Vec<Value>,
        id: impl Into<String>,
        tag: impl Into<String>,
        timestamp: Timestamp,
    ) -> ScrutinyResult<Self> {
        let mut df = Dataframe::from_schema(schema);
        let mut row = inputs;
        row.extend(outputs);
        df.push_row(row, id, tag, timestamp)?;
        Ok(df)
    }

    /// Append one row. Fails with `InvalidArgument` when the arity does not
    /// match the current column count, the row id is already present, or a
    /// cell carries a non-finite float (those do not survive the JSON data
    /// stream).
    pub fn push_row(
        &mut self,
        row: Vec<Value>,
        id: impl Into<String>,
        tag: impl Into<String>,
        timestamp: Timestamp,
    ) -> ScrutinyResult<()> {
        if row.len() != self.schema.column_count() {
            return Err(SchemaError::InvalidArgument {
                reason: format!(
                    "row arity {} does not match column count {}",
                    row.len(),
                    self.schema.column_count()
                ),
            }
            .into());
        }
        if let Some(i) = row.iter().position(|v| !v.is_finite()) {
            return Err(SchemaError::InvalidArgument {
                reason: format!("non-finite value in column {}", i),
            }
            .into());
        }
        let id = id.into();
        if self.ids.contains(&id) {
            return Err(SchemaError::InvalidArgument {
                reason: format!("duplicate row id: {}", id),
            }
            .into());
        }
        self.rows.push(row);
        self.ids.push(id);
        self.tags.push(tag.into());
        self.timestamps.push(timestamp);
        Ok(())
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn schema(&self) -> &SchemaMetadata {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut SchemaMetadata {
        &mut self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn row(&self, index: usize) -> ScrutinyResult<&[Value]> {
        self.rows
            .get(index)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                SchemaError::OutOfRange {
                    index,
                    len: self.rows.len(),
                }
                .into()
            })
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, index: usize) -> ScrutinyResult<Vec<Value>> {
        if index >= self.schema.column_count() {
            return Err(SchemaError::OutOfRange {
                index,
                len: self.schema.column_count(),
            }
            .into());
        }
        Ok(self.rows.iter().map(|row| row[index].clone()).collect())
    }

    /// (display name, column values) for every input column.
    pub fn input_columns(&self) -> Vec<(String, Vec<Value>)> {
        self.columns_with_role(ColumnRole::Input)
    }

    /// (display name, column values) for every output column.
    pub fn output_columns(&self) -> Vec<(String, Vec<Value>)> {
        self.columns_with_role(ColumnRole::Output)
    }

    fn columns_with_role(&self, role: ColumnRole) -> Vec<(String, Vec<Value>)> {
        let indices = match role {
            ColumnRole::Input => self.schema.input_indices(),
            ColumnRole::Output => self.schema.output_indices(),
        };
        indices
            .into_iter()
            .map(|i| {
                let name = self.schema.display_names()[i].clone();
                let values = self.rows.iter().map(|row| row[i].clone()).collect();
                (name, values)
            })
            .collect()
    }

    /// New dataframe containing only the rows whose tag is in `tags`.
    pub fn filter_by_tag(&self, tags: &[&str]) -> Dataframe {
        let mut filtered = Dataframe::from_schema(self.schema.clone());
        for i in 0..self.rows.len() {
            if tags.contains(&self.tags[i].as_str()) {
                filtered.rows.push(self.rows[i].clone());
                filtered.ids.push(self.ids[i].clone());
                filtered.tags.push(self.tags[i].clone());
                filtered.timestamps.push(self.timestamps[i]);
            }
        }
        filtered
    }

    /// Append all rows of `other`. Schemas must have the same column count;
    /// duplicate ids are rejected.
    pub fn extend(&mut self, other: Dataframe) -> ScrutinyResult<()> {
        for (((row, id), tag), ts) in other
            .rows
            .into_iter()
            .zip(other.ids)
            .zip(other.tags)
            .zip(other.timestamps)
        {
            self.push_row(row, id, tag, ts)?;
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
