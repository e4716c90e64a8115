//! Table schemas.

use super::value::TypeId;
use crate::error::{CoreError, CoreResult};

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    type_id: TypeId,
}

impl Column {
    /// Creates a column.
    pub fn new(name: impl Into<String>, type_id: TypeId) -> Self {
        Self {
            name: name.into(),
            type_id,
        }
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column type.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

/// Ordered list of columns describing a table's tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Creates a schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaMismatch`] if there are no columns or two
    /// columns share a name.
    pub fn new(columns: Vec<Column>) -> CoreResult<Self> {
        if columns.is_empty() {
            return Err(CoreError::schema_mismatch("schema has no columns"));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(CoreError::schema_mismatch(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Columns in tuple order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Position of the column called `name`.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}
