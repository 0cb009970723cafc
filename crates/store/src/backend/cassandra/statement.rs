//! Typed positional binding and extraction over the driver's value model.
//!
//! Prepared statements take their parameters in declaration order and
//! results hand columns back in selection order. [`Binding`] and
//! [`RowReader`] make both sides ordered and typed: values are pushed and
//! pulled positionally with automatic index advance, and every extraction
//! checks the column's shape, failing with [`Error::Decode`] on mismatch.

use chronicle_types::{AccountId, Hash, ObjectId};
use scylla::frame::response::result::{CqlValue, Row};
use snafu::OptionExt;

use crate::error::{DecodeSnafu, Result};

/// Ordered positional parameter list for one statement execution.
#[derive(Debug, Clone, Default)]
pub struct Binding {
    values: Vec<CqlValue>,
}

impl Binding {
    /// Starts an empty parameter list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the next parameter as a boolean.
    pub fn bool(mut self, value: bool) -> Self {
        self.values.push(CqlValue::Boolean(value));
        self
    }

    /// Binds the next parameter as raw bytes.
    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.values.push(CqlValue::Blob(value.to_vec()));
        self
    }

    /// Binds the next parameter as an object key.
    pub fn key(self, value: &ObjectId) -> Self {
        self.bytes(value.as_bytes())
    }

    /// Binds the next parameter as an account id.
    pub fn account(self, value: &AccountId) -> Self {
        self.bytes(value.as_bytes())
    }

    /// Binds the next parameter as a transaction or ledger hash.
    pub fn hash(self, value: &Hash) -> Self {
        self.bytes(value)
    }

    /// Binds the next parameter as a ledger sequence (stored as `bigint`).
    pub fn sequence(self, value: u32) -> Self {
        self.int(i64::from(value))
    }

    /// Binds the next parameter as a signed 64-bit integer.
    pub fn int(mut self, value: i64) -> Self {
        self.values.push(CqlValue::BigInt(value));
        self
    }

    /// Binds the next parameter as a 32-bit integer (`LIMIT` markers).
    pub fn limit(mut self, value: u32) -> Self {
        self.values.push(CqlValue::Int(value as i32));
        self
    }

    /// Binds the next parameter as a `(bigint, bigint)` tuple.
    pub fn tuple(mut self, first: i64, second: i64) -> Self {
        self.values.push(CqlValue::Tuple(vec![
            Some(CqlValue::BigInt(first)),
            Some(CqlValue::BigInt(second)),
        ]));
        self
    }

    /// Finalizes the list for execution.
    pub fn finish(self) -> Vec<CqlValue> {
        self.values
    }
}

/// Ordered positional extraction from one result row.
pub struct RowReader<'a> {
    columns: &'a [Option<CqlValue>],
    index: usize,
}

impl<'a> RowReader<'a> {
    /// Starts reading at the row's first column.
    pub fn new(row: &'a Row) -> Self {
        Self { columns: &row.columns, index: 0 }
    }

    fn advance(&mut self) -> Result<&'a CqlValue> {
        let value = self
            .columns
            .get(self.index)
            .and_then(|column| column.as_ref())
            .context(DecodeSnafu {
                message: format!("missing column at position {}", self.index),
            })?;
        self.index += 1;
        Ok(value)
    }

    fn mismatch<T>(&self, expected: &str, found: &CqlValue) -> Result<T> {
        DecodeSnafu {
            message: format!(
                "expected {expected} at position {}, found {found:?}",
                self.index - 1
            ),
        }
        .fail()
    }

    /// Reads the next column as raw bytes.
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        match self.advance()? {
            CqlValue::Blob(bytes) => Ok(bytes.clone()),
            other => self.mismatch("blob", other),
        }
    }

    /// Reads the next column as an object key.
    pub fn key(&mut self) -> Result<ObjectId> {
        let bytes = self.bytes()?;
        ObjectId::from_slice(&bytes).context(DecodeSnafu {
            message: format!("expected 32-byte key, found {} bytes", bytes.len()),
        })
    }

    /// Reads the next column as a transaction or ledger hash.
    pub fn hash(&mut self) -> Result<Hash> {
        let bytes = self.bytes()?;
        bytes.as_slice().try_into().ok().context(DecodeSnafu {
            message: format!("expected 32-byte hash, found {} bytes", bytes.len()),
        })
    }

    /// Reads the next column as a boolean.
    pub fn bool(&mut self) -> Result<bool> {
        match self.advance()? {
            CqlValue::Boolean(value) => Ok(*value),
            other => self.mismatch("boolean", other),
        }
    }

    /// Reads the next column as a signed 64-bit integer.
    pub fn int(&mut self) -> Result<i64> {
        match self.advance()? {
            CqlValue::BigInt(value) => Ok(*value),
            other => self.mismatch("bigint", other),
        }
    }

    /// Reads the next column as a ledger sequence stored in a `bigint`.
    pub fn sequence(&mut self) -> Result<u32> {
        let value = self.int()?;
        u32::try_from(value).ok().context(DecodeSnafu {
            message: format!("sequence {value} out of range"),
        })
    }

    /// Reads the next column as a `(bigint, bigint)` tuple.
    pub fn tuple(&mut self) -> Result<(i64, i64)> {
        let value = self.advance()?;
        let CqlValue::Tuple(parts) = value else {
            return self.mismatch("tuple", value);
        };
        match parts.as_slice() {
            [Some(CqlValue::BigInt(first)), Some(CqlValue::BigInt(second))] => {
                Ok((*first, *second))
            }
            _ => self.mismatch("(bigint, bigint) tuple", value),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn row(columns: Vec<Option<CqlValue>>) -> Row {
        Row { columns }
    }

    #[test]
    fn test_binding_preserves_order() {
        let values = Binding::new()
            .key(&ObjectId::new([1; 32]))
            .sequence(100)
            .bool(true)
            .tuple(7, 8)
            .limit(25)
            .finish();
        assert_eq!(values.len(), 5);
        assert!(matches!(&values[0], CqlValue::Blob(b) if b.len() == 32));
        assert!(matches!(values[1], CqlValue::BigInt(100)));
        assert!(matches!(values[2], CqlValue::Boolean(true)));
        assert!(matches!(&values[3], CqlValue::Tuple(parts) if parts.len() == 2));
        assert!(matches!(values[4], CqlValue::Int(25)));
    }

    #[test]
    fn test_reader_advances_through_columns() {
        let row = row(vec![
            Some(CqlValue::Blob(vec![0xAB; 32])),
            Some(CqlValue::BigInt(42)),
            Some(CqlValue::Boolean(false)),
        ]);
        let mut reader = RowReader::new(&row);
        assert_eq!(reader.key().expect("key"), ObjectId::new([0xAB; 32]));
        assert_eq!(reader.sequence().expect("sequence"), 42);
        assert!(!reader.bool().expect("bool"));
    }

    #[test]
    fn test_reader_rejects_shape_mismatch() {
        let row = row(vec![Some(CqlValue::BigInt(1))]);
        let mut reader = RowReader::new(&row);
        assert!(matches!(reader.bytes(), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_reader_rejects_missing_column() {
        let row = row(vec![]);
        let mut reader = RowReader::new(&row);
        assert!(matches!(reader.int(), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_reader_rejects_wrong_key_length() {
        let row = row(vec![Some(CqlValue::Blob(vec![1, 2, 3]))]);
        let mut reader = RowReader::new(&row);
        assert!(matches!(reader.key(), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_reader_rejects_negative_sequence() {
        let row = row(vec![Some(CqlValue::BigInt(-1))]);
        let mut reader = RowReader::new(&row);
        assert!(matches!(reader.sequence(), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_tuple_roundtrip() {
        let row = row(vec![Some(CqlValue::Tuple(vec![
            Some(CqlValue::BigInt(100)),
            Some(CqlValue::BigInt(3)),
        ]))]);
        let mut reader = RowReader::new(&row);
        assert_eq!(reader.tuple().expect("tuple"), (100, 3));
    }
}
