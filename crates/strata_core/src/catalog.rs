//! Schema lookup for table pages.
//!
//! Table pages store raw tuple images; decoding them needs the table's
//! schema. The engine asks a [`Catalog`] for it by oid.

use crate::tuple::Schema;
use crate::types::Oid;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Supplies the schema of each table.
pub trait Catalog: Send + Sync {
    /// Schema of table `oid`, if it is known.
    fn schema(&self, oid: Oid) -> Option<Arc<Schema>>;
}

/// A catalog held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    schemas: RwLock<HashMap<Oid, Arc<Schema>>>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the schema of `oid`.
    pub fn register(&self, oid: Oid, schema: Schema) -> Arc<Schema> {
        let schema = Arc::new(schema);
        self.schemas.write().insert(oid, Arc::clone(&schema));
        schema
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_table(self, oid: Oid, schema: Schema) -> Self {
        self.register(oid, schema);
        self
    }

    /// Registered oids in ascending order.
    #[must_use]
    pub fn oids(&self) -> Vec<Oid> {
        let mut oids: Vec<Oid> = self.schemas.read().keys().copied().collect();
        oids.sort();
        oids
    }
}

impl Catalog for MemoryCatalog {
    fn schema(&self, oid: Oid) -> Option<Arc<Schema>> {
        self.schemas.read().get(&oid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Column, TypeId};

    #[test]
    fn register_and_lookup() {
        let schema = Schema::new(vec![Column::new("id", TypeId::Integer)]).unwrap();
        let catalog = MemoryCatalog::new().with_table(Oid::new(2), schema.clone());
        catalog.register(Oid::new(1), schema.clone());

        assert_eq!(catalog.schema(Oid::new(2)).as_deref(), Some(&schema));
        assert!(catalog.schema(Oid::new(3)).is_none());
        assert_eq!(catalog.oids(), vec![Oid::new(1), Oid::new(2)]);
    }
}
