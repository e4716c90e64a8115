//! Property-based test generators using proptest.
//!
//! Provides strategies for generating schemas, values, tuples and whole
//! transaction workloads.

use proptest::prelude::*;
use proptest::sample::Index;
use strata_core::{Column, Schema, Tuple, TypeId, Value};

/// Strategy for column types.
pub fn type_id_strategy() -> impl Strategy<Value = TypeId> {
    prop_oneof![
        Just(TypeId::Boolean),
        Just(TypeId::Integer),
        Just(TypeId::BigInt),
        Just(TypeId::Double),
        Just(TypeId::Varchar),
    ]
}

/// Strategy for values of one type.
///
/// Doubles are finite so generated tuples compare equal to themselves.
pub fn value_strategy(type_id: TypeId) -> BoxedStrategy<Value> {
    match type_id {
        TypeId::Boolean => any::<bool>().prop_map(Value::Boolean).boxed(),
        TypeId::Integer => any::<i32>().prop_map(Value::Integer).boxed(),
        TypeId::BigInt => any::<i64>().prop_map(Value::BigInt).boxed(),
        TypeId::Double => (-1.0e12..1.0e12f64).prop_map(Value::Double).boxed(),
        TypeId::Varchar => "[a-zA-Z0-9 ]{0,64}".prop_map(Value::Varchar).boxed(),
    }
}

/// Strategy for schemas of one to eight columns named `c0`, `c1`, ...
pub fn schema_strategy() -> impl Strategy<Value = Schema> {
    prop::collection::vec(type_id_strategy(), 1..=8).prop_map(|types| {
        let columns = types
            .into_iter()
            .enumerate()
            .map(|(i, t)| Column::new(format!("c{i}"), t))
            .collect();
        Schema::new(columns).expect("generated column names are unique")
    })
}

/// Strategy for a tuple conforming to `schema`.
pub fn tuple_strategy(schema: &Schema) -> impl Strategy<Value = Tuple> {
    let values: Vec<BoxedStrategy<Value>> = schema
        .columns()
        .iter()
        .map(|c| value_strategy(c.type_id()))
        .collect();
    values.prop_map(Tuple::new)
}

/// Strategy for a schema together with tuples that conform to it.
pub fn schema_and_tuples_strategy(
    max_tuples: usize,
) -> impl Strategy<Value = (Schema, Vec<Tuple>)> {
    schema_strategy().prop_flat_map(move |schema| {
        let tuples = prop::collection::vec(tuple_strategy(&schema), 0..=max_tuples);
        (Just(schema), tuples)
    })
}

/// Strategy for `users` names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,24}"
}

/// One change against a table.
#[derive(Debug, Clone)]
pub enum TableOp {
    /// Insert a new row.
    Insert(String),
    /// Overwrite one of the visible rows.
    Update(Index, String),
    /// Delete one of the visible rows.
    Delete(Index),
}

/// How a generated transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Commit.
    Commit,
    /// Roll back.
    Abort,
}

/// A generated transaction: its changes and its outcome.
#[derive(Debug, Clone)]
pub struct TxnPlan {
    /// Changes in order.
    pub ops: Vec<TableOp>,
    /// How the transaction ends.
    pub outcome: Outcome,
}

/// Strategy for a single table change.
pub fn table_op_strategy() -> impl Strategy<Value = TableOp> {
    prop_oneof![
        3 => name_strategy().prop_map(TableOp::Insert),
        2 => (any::<Index>(), name_strategy()).prop_map(|(i, n)| TableOp::Update(i, n)),
        1 => any::<Index>().prop_map(TableOp::Delete),
    ]
}

/// Strategy for a transaction of up to `max_ops` changes.
pub fn txn_plan_strategy(max_ops: usize) -> impl Strategy<Value = TxnPlan> {
    (
        prop::collection::vec(table_op_strategy(), 1..=max_ops),
        prop_oneof![3 => Just(Outcome::Commit), 1 => Just(Outcome::Abort)],
    )
        .prop_map(|(ops, outcome)| TxnPlan { ops, outcome })
}

/// Strategy for a workload of up to `max_txns` transactions.
pub fn workload_strategy(
    max_txns: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<TxnPlan>> {
    prop::collection::vec(txn_plan_strategy(max_ops), 1..=max_txns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::page::TablePage;
    use strata_core::{Oid, PageId};

    proptest! {
        #[test]
        fn generated_tuples_conform(pair in schema_and_tuples_strategy(8)) {
            let (schema, tuples) = pair;
            for tuple in &tuples {
                let bytes = tuple.serialize(&schema).unwrap();
                prop_assert_eq!(&Tuple::deserialize(&bytes, &schema).unwrap(), tuple);
            }
        }

        #[test]
        fn a_page_holds_what_it_accepts(pair in schema_and_tuples_strategy(64)) {
            let (schema, tuples) = pair;
            let mut page = TablePage::new(PageId::new(1), Oid::new(1));
            let mut stored = Vec::new();
            for tuple in &tuples {
                let bytes = tuple.serialize(&schema).unwrap();
                if let Some(slot) = page.insert_tuple(&bytes) {
                    stored.push((slot, tuple.clone()));
                }
            }

            let page = TablePage::deserialize(&page.serialize()).unwrap();
            for (slot, tuple) in stored {
                let bytes = page.tuple(slot).unwrap();
                prop_assert_eq!(Tuple::deserialize(bytes, &schema).unwrap(), tuple);
            }
        }
    }
}
