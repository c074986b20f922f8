//! Evidence rows written for rejected and conflicting input.

use crate::error::{ErrMgrError, Result};

/// A key/value pair that collided with data already present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataConflictInfo {
    /// The conflicted key
    pub raw_key: Vec<u8>,
    /// The value stored under the conflicted key
    pub raw_value: Vec<u8>,
    /// Human readable projection of `raw_key`
    pub key_data: String,
    /// Human readable projection of the row
    pub row: String,
}

/// A conflict detected on a secondary index.
///
/// `raw_handle` is derived from the conflicted key or value, `raw_row` is the
/// data retrieved through it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexConflictInfo {
    pub index_name: String,
    pub conflict: DataConflictInfo,
    pub raw_handle: Vec<u8>,
    pub raw_row: Vec<u8>,
}

impl IndexConflictInfo {
    /// Builds index conflicts from parallel slices.
    ///
    /// All four slices must have the same length.
    pub fn zip(
        index_names: &[String],
        conflicts: &[DataConflictInfo],
        raw_handles: &[Vec<u8>],
        raw_rows: &[Vec<u8>],
    ) -> Result<Vec<Self>> {
        let n = conflicts.len();
        if index_names.len() != n || raw_handles.len() != n || raw_rows.len() != n {
            return Err(ErrMgrError::InvalidArgument(format!(
                "index conflict slices differ in length: {} names, {} conflicts, {} handles, {} rows",
                index_names.len(),
                n,
                raw_handles.len(),
                raw_rows.len()
            )));
        }
        Ok(index_names
            .iter()
            .zip(conflicts)
            .zip(raw_handles.iter().zip(raw_rows))
            .map(|((index_name, conflict), (raw_handle, raw_row))| Self {
                index_name: index_name.clone(),
                conflict: conflict.clone(),
                raw_handle: raw_handle.clone(),
                raw_row: raw_row.clone(),
            })
            .collect())
    }
}

/// A duplicate row reported by the SQL backend, kept for the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DuplicateRecord {
    pub table_name: String,
    pub path: String,
    pub offset: i64,
    pub error: String,
    pub row_id: i64,
    pub row_data: String,
}

/// A row that failed type conversion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeErrorRecord {
    pub table_name: String,
    pub path: String,
    pub offset: i64,
    pub error: String,
    pub row_data: String,
}

/// A source fragment that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyntaxErrorRecord {
    pub table_name: String,
    pub path: String,
    pub offset: i64,
    pub error: String,
    pub context: String,
}

/// Handle and row bytes read back from a persisted conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleRow {
    pub handle: Vec<u8>,
    pub row: Vec<u8>,
}

impl HandleRow {
    pub fn new(handle: Vec<u8>, row: Vec<u8>) -> Self {
        Self { handle, row }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_index_conflicts() {
        let conflicts = vec![DataConflictInfo {
            raw_key: b"k".to_vec(),
            key_data: "(1)".to_string(),
            ..Default::default()
        }];
        let zipped = IndexConflictInfo::zip(
            &["uk_name".to_string()],
            &conflicts,
            &[b"h".to_vec()],
            &[b"r".to_vec()],
        )
        .unwrap();
        assert_eq!(zipped.len(), 1);
        assert_eq!(zipped[0].index_name, "uk_name");
        assert_eq!(zipped[0].raw_handle, b"h".to_vec());
        assert_eq!(zipped[0].conflict.key_data, "(1)");
    }

    #[test]
    fn test_zip_rejects_length_mismatch() {
        let err = IndexConflictInfo::zip(&[], &[DataConflictInfo::default()], &[], &[]).unwrap_err();
        assert!(matches!(err, ErrMgrError::InvalidArgument(_)));
    }
}
