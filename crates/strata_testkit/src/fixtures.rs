//! Test fixtures and engine helpers.
//!
//! Provides convenience functions for setting up test engines and common
//! table layouts.

use std::path::Path;
use std::sync::Arc;
use strata_core::{
    Column, Config, MemoryCatalog, Oid, Rid, Schema, StorageEngine, TableHeap, Tuple, TypeId,
    Value,
};
use tempfile::TempDir;

/// Oid of the sample `users` table.
pub const USERS: Oid = Oid::new(100);

/// Oid of the sample `orders` table.
pub const ORDERS: Oid = Oid::new(200);

/// `users(id integer, name varchar)`.
pub fn users_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", TypeId::Integer),
        Column::new("name", TypeId::Varchar),
    ])
    .expect("users schema is valid")
}

/// `orders(id integer, user_id integer, amount double, paid boolean, placed bigint)`.
pub fn orders_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", TypeId::Integer),
        Column::new("user_id", TypeId::Integer),
        Column::new("amount", TypeId::Double),
        Column::new("paid", TypeId::Boolean),
        Column::new("placed", TypeId::BigInt),
    ])
    .expect("orders schema is valid")
}

/// A catalog that knows [`USERS`] and [`ORDERS`].
pub fn sample_catalog() -> Arc<MemoryCatalog> {
    Arc::new(
        MemoryCatalog::new()
            .with_table(USERS, users_schema())
            .with_table(ORDERS, orders_schema()),
    )
}

/// A `users` row.
pub fn user(id: i32, name: &str) -> Tuple {
    Tuple::new(vec![Value::Integer(id), Value::from(name)])
}

/// An `orders` row.
pub fn order(id: i32, user_id: i32, amount: f64) -> Tuple {
    Tuple::new(vec![
        Value::Integer(id),
        Value::Integer(user_id),
        Value::Double(amount),
        Value::Boolean(false),
        Value::BigInt(i64::from(id) * 1_000),
    ])
}

/// Live tuples of a table in scan order, without their RIDs.
pub fn rows(table: &TableHeap) -> Vec<Tuple> {
    table
        .scan()
        .expect("scan failed")
        .into_iter()
        .map(|(_, tuple)| tuple)
        .collect()
}

/// A test engine with automatic cleanup.
pub struct TestEngine {
    /// The engine instance.
    pub engine: StorageEngine,
    /// Catalog the engine was opened with.
    pub catalog: Arc<MemoryCatalog>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates an in-memory engine over [`sample_catalog`].
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates an in-memory engine with a custom configuration.
    pub fn memory_with_config(config: Config) -> Self {
        let catalog = sample_catalog();
        let engine = StorageEngine::open_in_memory(config, catalog.clone())
            .expect("Failed to open in-memory engine");
        Self {
            engine,
            catalog,
            temp_dir: None,
        }
    }

    /// Creates an engine in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let catalog = sample_catalog();
        let engine = StorageEngine::open(temp_dir.path(), Config::default(), catalog.clone())
            .expect("Failed to open file engine");
        Self {
            engine,
            catalog,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Closes the engine and opens the same directory again.
    ///
    /// # Panics
    ///
    /// Panics for in-memory engines.
    pub fn reopen(self) -> Self {
        let Self {
            engine,
            catalog,
            temp_dir,
        } = self;
        engine.close().expect("close failed");
        drop(engine);

        let dir = temp_dir.expect("only file engines can be reopened");
        let engine = StorageEngine::open(dir.path(), Config::default(), catalog.clone())
            .expect("Failed to reopen file engine");
        Self {
            engine,
            catalog,
            temp_dir: Some(dir),
        }
    }
}

impl std::ops::Deref for TestEngine {
    type Target = StorageEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Runs a test with a temporary in-memory engine.
///
/// # Example
///
/// ```rust,ignore
/// use strata_testkit::with_temp_engine;
///
/// #[test]
/// fn my_test() {
///     with_temp_engine(|engine| {
///         let txn = engine.begin().unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_engine<F, R>(f: F) -> R
where
    F: FnOnce(&StorageEngine) -> R,
{
    let test_engine = TestEngine::memory();
    f(&test_engine.engine)
}

/// Runs a test with an engine in a temporary directory.
pub fn with_file_engine<F, R>(f: F) -> R
where
    F: FnOnce(&StorageEngine, &Path) -> R,
{
    let test_engine = TestEngine::file();
    let path = test_engine.path().expect("File engine should have a path");
    f(&test_engine.engine, path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates an engine whose `users` table holds `count` committed rows.
    pub fn populated_users(count: i32) -> (TestEngine, TableHeap, Vec<Rid>) {
        let engine = TestEngine::memory();
        let mut txn = engine.begin().expect("begin failed");
        let users = engine
            .create_table(USERS, &mut txn)
            .expect("create_table failed");
        let rids = (0..count)
            .map(|i| {
                users
                    .insert_tuple(&user(i, &format!("user{i}")), &mut txn)
                    .expect("insert failed")
            })
            .collect();
        engine.commit(&mut txn).expect("commit failed");
        (engine, users, rids)
    }
}
