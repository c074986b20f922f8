//! Task-info tables and the statements that read and write them.
//!
//! Every table lives in one schema per ingestion task. The synthetic row id
//! used to scan conflicts in order is the table's `rowid`.

use crate::engine::{SqlValue, Statement};
use crate::record::{
    DataConflictInfo, DuplicateRecord, IndexConflictInfo, SyntaxErrorRecord, TypeErrorRecord,
};

/// Table holding rows that failed to parse.
pub const SYNTAX_ERROR_TABLE: &str = "syntax_error_v1";
/// Table holding rows that failed type conversion.
pub const TYPE_ERROR_TABLE: &str = "type_error_v1";
/// Table holding data and index conflicts found by duplicate detection.
pub const CONFLICT_ERROR_TABLE: &str = "conflict_error_v1";
/// Table holding duplicate rows shown to the user.
pub const DUP_RECORD_TABLE: &str = "conflict_records";

/// Quotes an identifier with backticks, doubling embedded backticks.
pub fn escape_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Formats `schema.table` for messages, with `schema` already escaped.
pub fn fmt_table_name(schema_escaped: &str, table: &str) -> String {
    format!("{}.`{}`", schema_escaped, table)
}

/// Error tables that can be created in the task-info schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTable {
    SyntaxError,
    TypeError,
    ConflictError,
    DupRecord,
}

impl ErrorTable {
    /// All tables, in creation order.
    pub const ALL: [ErrorTable; 4] = [
        ErrorTable::SyntaxError,
        ErrorTable::TypeError,
        ErrorTable::ConflictError,
        ErrorTable::DupRecord,
    ];

    /// Unqualified table name.
    pub fn name(self) -> &'static str {
        match self {
            ErrorTable::SyntaxError => SYNTAX_ERROR_TABLE,
            ErrorTable::TypeError => TYPE_ERROR_TABLE,
            ErrorTable::ConflictError => CONFLICT_ERROR_TABLE,
            ErrorTable::DupRecord => DUP_RECORD_TABLE,
        }
    }

    /// Label used in logs when creating the table.
    pub fn create_label(self) -> &'static str {
        match self {
            ErrorTable::SyntaxError => "create syntax error table",
            ErrorTable::TypeError => "create type error table",
            ErrorTable::ConflictError => "create conflict error v1 table",
            ErrorTable::DupRecord => "create duplicate records table",
        }
    }

    /// DDL creating the table and its indexes inside `schema`.
    pub fn create_statements(self, schema: &str) -> Vec<Statement> {
        let created = "create_time TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))";
        match self {
            ErrorTable::SyntaxError => vec![Statement::new(format!(
                "CREATE TABLE IF NOT EXISTS {schema}.{SYNTAX_ERROR_TABLE} (
                    task_id     INTEGER NOT NULL,
                    {created},
                    table_name  TEXT NOT NULL,
                    path        TEXT NOT NULL,
                    `offset`    INTEGER NOT NULL,
                    error       TEXT NOT NULL,
                    context     TEXT
                )"
            ))],
            ErrorTable::TypeError => vec![Statement::new(format!(
                "CREATE TABLE IF NOT EXISTS {schema}.{TYPE_ERROR_TABLE} (
                    task_id     INTEGER NOT NULL,
                    {created},
                    table_name  TEXT NOT NULL,
                    path        TEXT NOT NULL,
                    `offset`    INTEGER NOT NULL,
                    error       TEXT NOT NULL,
                    row_data    TEXT NOT NULL
                )"
            ))],
            ErrorTable::ConflictError => vec![
                Statement::new(format!(
                    "CREATE TABLE IF NOT EXISTS {schema}.{CONFLICT_ERROR_TABLE} (
                        task_id     INTEGER NOT NULL,
                        {created},
                        table_name  TEXT NOT NULL,
                        index_name  TEXT NOT NULL,
                        key_data    TEXT NOT NULL,
                        row_data    TEXT NOT NULL,
                        raw_key     BLOB NOT NULL,
                        raw_value   BLOB NOT NULL,
                        raw_handle  BLOB NOT NULL,
                        raw_row     BLOB NOT NULL
                    )"
                )),
                Statement::new(format!(
                    "CREATE INDEX IF NOT EXISTS {schema}.idx_{CONFLICT_ERROR_TABLE}_task_table
                    ON {CONFLICT_ERROR_TABLE} (task_id, table_name)"
                )),
            ],
            ErrorTable::DupRecord => vec![
                Statement::new(format!(
                    "CREATE TABLE IF NOT EXISTS {schema}.{DUP_RECORD_TABLE} (
                        task_id     INTEGER NOT NULL,
                        {created},
                        table_name  TEXT NOT NULL,
                        path        TEXT NOT NULL,
                        `offset`    INTEGER NOT NULL,
                        error       TEXT NOT NULL,
                        row_id      INTEGER NOT NULL,
                        row_data    TEXT NOT NULL
                    )"
                )),
                Statement::new(format!(
                    "CREATE INDEX IF NOT EXISTS {schema}.idx_{DUP_RECORD_TABLE}_task_table
                    ON {DUP_RECORD_TABLE} (task_id, table_name)"
                )),
            ],
        }
    }
}

/// Inserts one type error row.
pub fn insert_type_error(schema: &str, task_id: i64, record: &TypeErrorRecord) -> Statement {
    Statement::with_args(
        format!(
            "INSERT INTO {schema}.{TYPE_ERROR_TABLE}
            (task_id, table_name, path, `offset`, error, row_data)
            VALUES (?, ?, ?, ?, ?, ?)"
        ),
        vec![
            task_id.into(),
            record.table_name.as_str().into(),
            record.path.as_str().into(),
            record.offset.into(),
            record.error.as_str().into(),
            record.row_data.as_str().into(),
        ],
    )
}

/// Inserts one syntax error row.
pub fn insert_syntax_error(schema: &str, task_id: i64, record: &SyntaxErrorRecord) -> Statement {
    Statement::with_args(
        format!(
            "INSERT INTO {schema}.{SYNTAX_ERROR_TABLE}
            (task_id, table_name, path, `offset`, error, context)
            VALUES (?, ?, ?, ?, ?, ?)"
        ),
        vec![
            task_id.into(),
            record.table_name.as_str().into(),
            record.path.as_str().into(),
            record.offset.into(),
            record.error.as_str().into(),
            record.context.as_str().into(),
        ],
    )
}

const CONFLICT_COLUMNS: &str =
    "(task_id, table_name, index_name, key_data, row_data, raw_key, raw_value, raw_handle, raw_row)";

/// Conflict rows per insert statement, keeping bind variables well under
/// SQLite's limit of 32766.
pub const CONFLICT_ROWS_PER_STATEMENT: usize = 1000;

/// Inserts a batch of primary key conflicts, one multi-row statement per
/// [`CONFLICT_ROWS_PER_STATEMENT`] rows.
///
/// The handle of a data conflict is its key and the row is its value.
pub fn insert_data_conflicts(
    schema: &str,
    task_id: i64,
    table_name: &str,
    conflicts: &[DataConflictInfo],
) -> Vec<Statement> {
    conflicts
        .chunks(CONFLICT_ROWS_PER_STATEMENT)
        .map(|chunk| {
            let mut sql =
                format!("INSERT INTO {schema}.{CONFLICT_ERROR_TABLE} {CONFLICT_COLUMNS} VALUES ");
            let mut args: Vec<SqlValue> = Vec::with_capacity(chunk.len() * 8);
            for (i, conflict) in chunk.iter().enumerate() {
                if i > 0 {
                    sql.push(',');
                }
                sql.push_str("(?,?,'PRIMARY',?,?,?,?,?,?)");
                args.extend([
                    task_id.into(),
                    table_name.into(),
                    conflict.key_data.as_str().into(),
                    conflict.row.as_str().into(),
                    conflict.raw_key.as_slice().into(),
                    conflict.raw_value.as_slice().into(),
                    conflict.raw_key.as_slice().into(),
                    conflict.raw_value.as_slice().into(),
                ]);
            }
            Statement::with_args(sql, args)
        })
        .collect()
}

/// Inserts a batch of index conflicts, chunked like [`insert_data_conflicts`].
pub fn insert_index_conflicts(
    schema: &str,
    task_id: i64,
    table_name: &str,
    conflicts: &[IndexConflictInfo],
) -> Vec<Statement> {
    conflicts
        .chunks(CONFLICT_ROWS_PER_STATEMENT)
        .map(|chunk| {
            let mut sql =
                format!("INSERT INTO {schema}.{CONFLICT_ERROR_TABLE} {CONFLICT_COLUMNS} VALUES ");
            let mut args: Vec<SqlValue> = Vec::with_capacity(chunk.len() * 9);
            for (i, info) in chunk.iter().enumerate() {
                if i > 0 {
                    sql.push(',');
                }
                sql.push_str("(?,?,?,?,?,?,?,?,?)");
                args.extend([
                    task_id.into(),
                    table_name.into(),
                    info.index_name.as_str().into(),
                    info.conflict.key_data.as_str().into(),
                    info.conflict.row.as_str().into(),
                    info.conflict.raw_key.as_slice().into(),
                    info.conflict.raw_value.as_slice().into(),
                    info.raw_handle.as_slice().into(),
                    info.raw_row.as_slice().into(),
                ]);
            }
            Statement::with_args(sql, args)
        })
        .collect()
}

/// Inserts one duplicate record row.
pub fn insert_duplicate(schema: &str, task_id: i64, record: &DuplicateRecord) -> Statement {
    Statement::with_args(
        format!(
            "INSERT INTO {schema}.{DUP_RECORD_TABLE}
            (task_id, table_name, path, `offset`, error, row_id, row_data)
            VALUES (?, ?, ?, ?, ?, ?, ?)"
        ),
        vec![
            task_id.into(),
            record.table_name.as_str().into(),
            record.path.as_str().into(),
            record.offset.into(),
            record.error.as_str().into(),
            record.row_id.into(),
            record.row_data.as_str().into(),
        ],
    )
}

/// Reads up to `limit` conflicts of `table_name` with `start <= rowid < end`,
/// in ascending row id order. Columns: `rowid`, `raw_handle`, `raw_row`.
pub fn select_conflict_keys(
    schema: &str,
    table_name: &str,
    start: i64,
    end: i64,
    limit: i64,
) -> Statement {
    Statement::with_args(
        format!(
            "SELECT rowid, raw_handle, raw_row
            FROM {schema}.{CONFLICT_ERROR_TABLE}
            WHERE table_name = ? AND rowid >= ? AND rowid < ?
            ORDER BY rowid LIMIT ?"
        ),
        vec![table_name.into(), start.into(), end.into(), limit.into()],
    )
}

/// Counts rows of `table` per target table name.
pub fn count_by_table(schema: &str, table: ErrorTable) -> Statement {
    Statement::new(format!(
        "SELECT table_name, COUNT(*) FROM {schema}.{} GROUP BY table_name ORDER BY table_name",
        table.name()
    ))
}

/// Lists the human readable projection of persisted conflicts for one table.
/// Columns: `rowid`, `index_name`, `key_data`, `row_data`.
pub fn select_conflict_details(schema: &str, table_name: &str, limit: i64) -> Statement {
    Statement::with_args(
        format!(
            "SELECT rowid, index_name, key_data, row_data
            FROM {schema}.{CONFLICT_ERROR_TABLE}
            WHERE table_name = ?
            ORDER BY rowid LIMIT ?"
        ),
        vec![table_name.into(), limit.into()],
    )
}
