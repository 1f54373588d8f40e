//! Column schema metadata for observation tables
//!
//! Columns are stored arena-style as index-aligned parallel vectors rather
//! than a vector of structs: metric engines consume whole lists (all types,
//! all roles) far more often than single descriptors. Structural mutation
//! (`add_column`/`remove_column`) shifts indices for every list at once, so
//! owners must hold exclusive access (e.g. a write lock) across it; the
//! per-index setters only touch one slot.

use crate::error::{SchemaError, ScrutinyResult};
use crate::value::{ColumnDomain, ColumnRole, ColumnType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tensor label grouping input columns when the record originated from a
/// named-tensor serialization.
pub const DEFAULT_INPUT_TENSOR_NAME: &str = "input";
/// Tensor label grouping output columns.
pub const DEFAULT_OUTPUT_TENSOR_NAME: &str = "output";

// ============================================================================
// COLUMN DESCRIPTOR
// ============================================================================

/// Full description of one dataset column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Immutable identity of the column.
    pub raw_name: String,
    /// Mutable display name; `None` means the raw name is displayed.
    pub alias: Option<String>,
    pub column_type: ColumnType,
    /// Whether downstream optimizers may hold this column's value fixed.
    pub constrained: bool,
    pub domain: ColumnDomain,
    pub role: ColumnRole,
}

// ============================================================================
// SCHEMA METADATA
// ============================================================================

/// Schema of one model's observation table: index-aligned descriptor lists
/// plus a derived display-name cache (`alias ?? raw_name`).
///
/// `Clone` yields a fully independent deep copy; mutating the clone never
/// affects the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    names: Vec<String>,
    aliases: Vec<Option<String>>,
    types: Vec<ColumnType>,
    constrained: Vec<bool>,
    domains: Vec<ColumnDomain>,
    roles: Vec<ColumnRole>,
    display_names: Vec<String>,
    input_tensor_name: String,
    output_tensor_name: String,
}

impl Default for SchemaMetadata {
    fn default() -> Self {
        Self::empty()
    }
}

impl SchemaMetadata {
    /// Create an empty schema with default tensor labels.
    pub fn empty() -> Self {
        SchemaMetadata {
            names: Vec::new(),
            aliases: Vec::new(),
            types: Vec::new(),
            constrained: Vec::new(),
            domains: Vec::new(),
            roles: Vec::new(),
            display_names: Vec::new(),
            input_tensor_name: DEFAULT_INPUT_TENSOR_NAME.to_string(),
            output_tensor_name: DEFAULT_OUTPUT_TENSOR_NAME.to_string(),
        }
    }

    /// Construct from parallel lists. Fails with `InvalidArgument` when the
    /// lists are not the same length.
    pub fn new(
        names: Vec<String>,
        aliases: Vec<Option<String>>,
        types: Vec<ColumnType>,
        constrained: Vec<bool>,
        domains: Vec<ColumnDomain>,
        roles: Vec<ColumnRole>,
    ) -> ScrutinyResult<Self> {
        let len = names.len();
        if aliases.len() != len
            || types.len() != len
            || constrained.len() != len
            || domains.len() != len
            || roles.len() != len
        {
            return Err(SchemaError::InvalidArgument {
                reason: format!(
                    "descriptor lists must be the same length, got {}/{}/{}/{}/{}/{}",
                    len,
                    aliases.len(),
                    types.len(),
                    constrained.len(),
                    domains.len(),
                    roles.len()
                ),
            }
            .into());
        }
        let mut schema = SchemaMetadata {
            names,
            aliases,
            types,
            constrained,
            domains,
            roles,
            display_names: Vec::new(),
            input_tensor_name: DEFAULT_INPUT_TENSOR_NAME.to_string(),
            output_tensor_name: DEFAULT_OUTPUT_TENSOR_NAME.to_string(),
        };
        schema.rebuild_display_names();
        Ok(schema)
    }

    // ========================================================================
    // STRUCTURAL MUTATION
    // ========================================================================

    /// Append a column descriptor to every parallel list.
    pub fn add_column(&mut self, descriptor: ColumnDescriptor) {
        self.display_names.push(
            descriptor
                .alias
                .clone()
                .unwrap_or_else(|| descriptor.raw_name.clone()),
        );
        self.names.push(descriptor.raw_name);
        self.aliases.push(descriptor.alias);
        self.types.push(descriptor.column_type);
        self.constrained.push(descriptor.constrained);
        self.domains.push(descriptor.domain);
        self.roles.push(descriptor.role);
    }

    /// Append an input (feature) column.
    pub fn add_input(
        &mut self,
        name: impl Into<String>,
        column_type: ColumnType,
        constrained: bool,
        domain: ColumnDomain,
    ) {
        self.add_column(ColumnDescriptor {
            raw_name: name.into(),
            alias: None,
            column_type,
            constrained,
            domain,
            role: ColumnRole::Input,
        });
    }

    /// Append an output column. Outputs carry no domain and are constrained.
    pub fn add_output(&mut self, name: impl Into<String>, column_type: ColumnType) {
        self.add_column(ColumnDescriptor {
            raw_name: name.into(),
            alias: None,
            column_type,
            constrained: true,
            domain: ColumnDomain::Empty,
            role: ColumnRole::Output,
        });
    }

    /// Remove the column at `index` from every parallel list and the display
    /// cache in one step.
    pub fn remove_column(&mut self, index: usize) -> ScrutinyResult<()> {
        self.check_index(index)?;
        self.names.remove(index);
        self.aliases.remove(index);
        self.types.remove(index);
        self.constrained.remove(index);
        self.domains.remove(index);
        self.roles.remove(index);
        self.display_names.remove(index);
        Ok(())
    }

    // ========================================================================
    // PER-INDEX SETTERS
    // ========================================================================

    /// Set or clear the display alias for one column.
    pub fn set_alias(&mut self, index: usize, alias: Option<String>) -> ScrutinyResult<()> {
        self.check_index(index)?;
        self.display_names[index] = alias.clone().unwrap_or_else(|| self.names[index].clone());
        self.aliases[index] = alias;
        Ok(())
    }

    pub fn set_type(&mut self, index: usize, column_type: ColumnType) -> ScrutinyResult<()> {
        self.check_index(index)?;
        self.types[index] = column_type;
        Ok(())
    }

    pub fn set_constrained(&mut self, index: usize, constrained: bool) -> ScrutinyResult<()> {
        self.check_index(index)?;
        self.constrained[index] = constrained;
        Ok(())
    }

    pub fn set_domain(&mut self, index: usize, domain: ColumnDomain) -> ScrutinyResult<()> {
        self.check_index(index)?;
        self.domains[index] = domain;
        Ok(())
    }

    pub fn set_role(&mut self, index: usize, role: ColumnRole) -> ScrutinyResult<()> {
        self.check_index(index)?;
        self.roles[index] = role;
        Ok(())
    }

    /// Bulk-rename by raw name. Raw names present in the map get the mapped
    /// alias; columns not named in the map keep their current alias. The
    /// display cache is recomputed once.
    pub fn apply_aliases(&mut self, name_to_alias: &HashMap<String, String>) {
        for (i, name) in self.names.iter().enumerate() {
            if let Some(alias) = name_to_alias.get(name) {
                self.aliases[i] = Some(alias.clone());
            }
        }
        self.rebuild_display_names();
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn column_count(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn raw_name(&self, index: usize) -> ScrutinyResult<&str> {
        self.check_index(index)?;
        Ok(&self.names[index])
    }

    pub fn alias(&self, index: usize) -> ScrutinyResult<Option<&str>> {
        self.check_index(index)?;
        Ok(self.aliases[index].as_deref())
    }

    pub fn column_type(&self, index: usize) -> ScrutinyResult<ColumnType> {
        self.check_index(index)?;
        Ok(self.types[index])
    }

    pub fn constrained(&self, index: usize) -> ScrutinyResult<bool> {
        self.check_index(index)?;
        Ok(self.constrained[index])
    }

    pub fn domain(&self, index: usize) -> ScrutinyResult<&ColumnDomain> {
        self.check_index(index)?;
        Ok(&self.domains[index])
    }

    pub fn role(&self, index: usize) -> ScrutinyResult<ColumnRole> {
        self.check_index(index)?;
        Ok(self.roles[index])
    }

    /// Display name for one column: alias when set, raw name otherwise.
    pub fn display_name(&self, index: usize) -> ScrutinyResult<&str> {
        self.check_index(index)?;
        Ok(&self.display_names[index])
    }

    /// Cached display names, index-aligned with the descriptor lists.
    pub fn display_names(&self) -> &[String] {
        &self.display_names
    }

    pub fn raw_names(&self) -> &[String] {
        &self.names
    }

    pub fn aliases(&self) -> &[Option<String>] {
        &self.aliases
    }

    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    pub fn constrained_flags(&self) -> &[bool] {
        &self.constrained
    }

    pub fn domains(&self) -> &[ColumnDomain] {
        &self.domains
    }

    pub fn roles(&self) -> &[ColumnRole] {
        &self.roles
    }

    /// Indices of the input (feature) columns, in schema order.
    pub fn input_indices(&self) -> Vec<usize> {
        self.indices_with_role(ColumnRole::Input)
    }

    /// Indices of the output columns, in schema order.
    pub fn output_indices(&self) -> Vec<usize> {
        self.indices_with_role(ColumnRole::Output)
    }

    fn indices_with_role(&self, role: ColumnRole) -> Vec<usize> {
        self.roles
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == role)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn input_tensor_name(&self) -> &str {
        &self.input_tensor_name
    }

    pub fn set_input_tensor_name(&mut self, name: impl Into<String>) {
        self.input_tensor_name = name.into();
    }

    pub fn output_tensor_name(&self) -> &str {
        &self.output_tensor_name
    }

    pub fn set_output_tensor_name(&mut self, name: impl Into<String>) {
        self.output_tensor_name = name.into();
    }

    // ========================================================================
    // INTERNAL
    // ========================================================================

    fn check_index(&self, index: usize) -> ScrutinyResult<()> {
        if index >= self.names.len() {
            return Err(SchemaError::OutOfRange {
                index,
                len: self.names.len(),
            }
            .into());
        }
        Ok(())
    }

    fn rebuild_display_names(&mut self) {
        self.display_names = self
            .names
            .iter()
            .zip(self.aliases.iter())
            .map(|(name, alias)| alias.clone().unwrap_or_else(|| name.clone()))
            .collect();
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
