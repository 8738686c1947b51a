// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Tablet identity and schema.

use std::collections::HashSet;
use std::path::PathBuf;

use super::TabletError;

/// A column in the table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    /// Part of the primary key.
    pub is_key: bool,
}

impl ColumnSchema {
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_key: true,
        }
    }

    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_key: false,
        }
    }
}

/// A versioned table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    version: u32,
    columns: Vec<ColumnSchema>,
}

impl Schema {
    /// Validates and builds a schema.
    ///
    /// Column names must be unique and at least one column must be a key.
    pub fn new(version: u32, columns: Vec<ColumnSchema>) -> Result<Self, TabletError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if column.name.is_empty() {
                return Err(TabletError::InvalidSchema("empty column name".to_string()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(TabletError::InvalidSchema(format!(
                    "duplicate column {}",
                    column.name
                )));
            }
        }
        if !columns.iter().any(|c| c.is_key) {
            return Err(TabletError::InvalidSchema("no key column".to_string()));
        }
        Ok(Self { version, columns })
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| c.is_key)
    }

    /// Checks that `next` may replace this schema.
    pub(crate) fn validate_successor(&self, next: &Schema) -> Result<(), TabletError> {
        if next.version <= self.version {
            return Err(TabletError::InvalidSchema(format!(
                "schema version {} does not advance past {}",
                next.version, self.version
            )));
        }
        if !self.key_columns().eq(next.key_columns()) {
            return Err(TabletError::InvalidSchema(
                "key columns cannot change".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identity, location and schema of a tablet.
#[derive(Debug, Clone)]
pub struct TabletMetadata {
    pub tablet_id: String,
    pub table_name: String,
    /// Directory holding the storage engine's files.
    pub data_dir: PathBuf,
    pub schema: Schema,
}

impl TabletMetadata {
    pub fn new(
        tablet_id: impl Into<String>,
        table_name: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        schema: Schema,
    ) -> Self {
        Self {
            tablet_id: tablet_id.into(),
            table_name: table_name.into(),
            data_dir: data_dir.into(),
            schema,
        }
    }
}
