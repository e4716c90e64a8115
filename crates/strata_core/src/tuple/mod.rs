//! Tuples and their byte encoding.
//!
//! A tuple encodes as the concatenation of its column values in schema
//! order. Fixed-size types use their native little-endian width; `Varchar`
//! is a 4-byte length followed by UTF-8 bytes. The encoding carries no type
//! information, so decoding always needs the table schema.

mod schema;
mod value;

pub use schema::{Column, Schema};
pub use value::{TypeId, Value};

use crate::error::{CoreError, CoreResult};

/// A row of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    /// Creates a tuple from values in column order.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// All values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of column `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Consumes the tuple, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Encodes the tuple for `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaMismatch`] if the arity or any value type
    /// differs from the schema.
    pub fn serialize(&self, schema: &Schema) -> CoreResult<Vec<u8>> {
        if self.values.len() != schema.column_count() {
            return Err(CoreError::schema_mismatch(format!(
                "tuple has {} values, schema has {} columns",
                self.values.len(),
                schema.column_count()
            )));
        }
        let mut buf = Vec::with_capacity(self.values.iter().map(Value::encoded_len).sum());
        for (value, column) in self.values.iter().zip(schema.columns()) {
            if value.type_id() != column.type_id() {
                return Err(CoreError::schema_mismatch(format!(
                    "column '{}' is {}, got {}",
                    column.name(),
                    column.type_id(),
                    value.type_id()
                )));
            }
            match value {
                Value::Boolean(v) => buf.push(u8::from(*v)),
                Value::Integer(v) => buf.extend_from_slice(&v.to_le_bytes()),
                Value::BigInt(v) => buf.extend_from_slice(&v.to_le_bytes()),
                Value::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
                Value::Varchar(s) => {
                    let len = i32::try_from(s.len()).map_err(|_| {
                        CoreError::schema_mismatch(format!(
                            "column '{}' value is too long",
                            column.name()
                        ))
                    })?;
                    buf.extend_from_slice(&len.to_le_bytes());
                    buf.extend_from_slice(s.as_bytes());
                }
            }
        }
        Ok(buf)
    }

    /// Decodes a tuple image written for `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaMismatch`] if the bytes are too short, too
    /// long, or hold invalid UTF-8 or booleans.
    pub fn deserialize(bytes: &[u8], schema: &Schema) -> CoreResult<Self> {
        let mut pos = 0usize;
        let mut values = Vec::with_capacity(schema.column_count());

        for column in schema.columns() {
            let mut take = |len: usize| take_bytes(bytes, &mut pos, len, column);

            let value = match column.type_id() {
                TypeId::Boolean => match take(1)?[0] {
                    0 => Value::Boolean(false),
                    1 => Value::Boolean(true),
                    other => {
                        return Err(CoreError::schema_mismatch(format!(
                            "column '{}' holds invalid boolean {other}",
                            column.name()
                        )))
                    }
                },
                TypeId::Integer => Value::Integer(i32::from_le_bytes(fixed(take(4)?))),
                TypeId::BigInt => Value::BigInt(i64::from_le_bytes(fixed(take(8)?))),
                TypeId::Double => Value::Double(f64::from_le_bytes(fixed(take(8)?))),
                TypeId::Varchar => {
                    let len = i32::from_le_bytes(fixed(take(4)?));
                    let len = usize::try_from(len).map_err(|_| {
                        CoreError::schema_mismatch(format!(
                            "column '{}' has negative length {len}",
                            column.name()
                        ))
                    })?;
                    let raw = take(len)?;
                    let s = std::str::from_utf8(raw).map_err(|_| {
                        CoreError::schema_mismatch(format!(
                            "column '{}' is not valid UTF-8",
                            column.name()
                        ))
                    })?;
                    Value::Varchar(s.to_string())
                }
            };
            values.push(value);
        }

        if pos != bytes.len() {
            return Err(CoreError::schema_mismatch(format!(
                "tuple image has {} trailing bytes",
                bytes.len() - pos
            )));
        }
        Ok(Self { values })
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

fn take_bytes<'a>(
    bytes: &'a [u8],
    pos: &mut usize,
    len: usize,
    column: &Column,
) -> CoreResult<&'a [u8]> {
    let slice = bytes.get(*pos..*pos + len).ok_or_else(|| {
        CoreError::schema_mismatch(format!(
            "tuple image ends inside column '{}'",
            column.name()
        ))
    })?;
    *pos += len;
    Ok(slice)
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("flag", TypeId::Boolean),
            Column::new("id", TypeId::Integer),
            Column::new("big", TypeId::BigInt),
            Column::new("score", TypeId::Double),
            Column::new("name", TypeId::Varchar),
        ])
        .unwrap()
    }

    #[test]
    fn encodes_native_widths() {
        let tuple = Tuple::new(vec![
            true.into(),
            7i32.into(),
            (-1i64).into(),
            1.5f64.into(),
            "abc".into(),
        ]);
        let bytes = tuple.serialize(&schema()).unwrap();
        assert_eq!(bytes.len(), 1 + 4 + 8 + 8 + 4 + 3);
        assert_eq!(&bytes[1..5], &7i32.to_le_bytes());
        assert_eq!(&bytes[21..25], &3i32.to_le_bytes());
        assert_eq!(Tuple::deserialize(&bytes, &schema()).unwrap(), tuple);
    }

    #[test]
    fn type_and_arity_are_checked() {
        let schema = Schema::new(vec![Column::new("id", TypeId::Integer)]).unwrap();
        assert!(Tuple::new(vec!["x".into()]).serialize(&schema).is_err());
        assert!(Tuple::new(vec![1i32.into(), 2i32.into()]).serialize(&schema).is_err());
    }

    #[test]
    fn malformed_images_are_rejected() {
        let schema = Schema::new(vec![Column::new("name", TypeId::Varchar)]).unwrap();
        assert!(Tuple::deserialize(&[5, 0, 0, 0, b'a'], &schema).is_err());
        assert!(Tuple::deserialize(&[1, 0, 0, 0, 0xFF], &schema).is_err());
        assert!(Tuple::deserialize(&[0, 0, 0, 0, 1], &schema).is_err());
    }

    proptest! {
        #[test]
        fn any_row_roundtrips(
            flag in any::<bool>(),
            id in any::<i32>(),
            big in any::<i64>(),
            score in -1.0e9f64..1.0e9,
            name in "[a-z0-9 ]{0,40}",
        ) {
            let tuple = Tuple::new(vec![
                flag.into(), id.into(), big.into(), score.into(), name.into(),
            ]);
            let bytes = tuple.serialize(&schema()).unwrap();
            prop_assert_eq!(Tuple::deserialize(&bytes, &schema()).unwrap(), tuple);
        }
    }
}
