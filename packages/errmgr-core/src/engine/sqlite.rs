//! SQLite-backed execution engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};

use crate::config::EngineConfig;
use crate::error::{ErrMgrError, Result};
use crate::schema::escape_identifier;

use super::retry::{retry_transient, RetryOptions};
use super::{ExecutionEngine, Row, SqlValue, Statement, TxnBody, TxnExecutor};

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            SqlValue::Null => ValueRef::Null,
            SqlValue::Integer(v) => ValueRef::Integer(*v),
            SqlValue::Real(v) => ValueRef::Real(*v),
            SqlValue::Text(s) => ValueRef::Text(s.as_bytes()),
            SqlValue::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

impl TryFrom<ValueRef<'_>> for SqlValue {
    type Error = ErrMgrError;

    fn try_from(value: ValueRef<'_>) -> Result<Self> {
        Ok(match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(t) => SqlValue::Text(
                String::from_utf8(t.to_vec()).map_err(|e| ErrMgrError::Decode(e.to_string()))?,
            ),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        })
    }
}

/// Transaction executor over an open SQLite transaction.
struct SqliteTxn<'a, 'conn> {
    tx: &'a rusqlite::Transaction<'conn>,
}

impl TxnExecutor for SqliteTxn<'_, '_> {
    fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        let affected = self
            .tx
            .execute(&stmt.sql, params_from_iter(stmt.args.iter()))?;
        Ok(affected as u64)
    }
}

/// Execution engine over a single SQLite connection.
///
/// Error schemas are attached databases: a sibling file next to an on-disk
/// database, or a private in-memory database otherwise.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    /// Shared connection; statements run on the blocking thread pool
    conn: Arc<Mutex<Connection>>,
    /// Path of the main database, `None` when in memory
    path: Option<PathBuf>,
    /// Retry policy for transient errors
    options: RetryOptions,
}

impl SqliteEngine {
    /// Opens (or creates) an on-disk database.
    pub fn open(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn, Some(path.as_ref().to_path_buf()), config)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(config: &EngineConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, None, config)
    }

    fn with_connection(
        conn: Connection,
        path: Option<PathBuf>,
        config: &EngineConfig,
    ) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            options: RetryOptions::from(config),
        })
    }

    /// Path of the main database, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// File backing an attached schema.
    fn attach_target(&self, schema: &str) -> String {
        match &self.path {
            Some(path) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "errmgr".to_string());
                path.with_file_name(format!("{}.{}.db", stem, schema))
                    .to_string_lossy()
                    .into_owned()
            }
            None => ":memory:".to_string(),
        }
    }

    /// Runs `f` against the connection on the blocking thread pool.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| ErrMgrError::WorkerPanic(e.to_string()))?
    }
}

#[async_trait]
impl ExecutionEngine for SqliteEngine {
    async fn ensure_schema(&self, schema: &str) -> Result<()> {
        if schema == "main" || schema == "temp" {
            return Ok(());
        }
        let name = schema.to_string();
        let target = self.attach_target(schema);
        self.run_blocking(move |conn| {
            let attached = {
                let mut stmt = conn.prepare("PRAGMA database_list")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(1))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                names
            };
            if attached.iter().any(|n| n == &name) {
                return Ok(());
            }
            conn.execute(
                &format!("ATTACH DATABASE ?1 AS {}", escape_identifier(&name)),
                [target],
            )?;
            tracing::debug!("Attached schema {}", name);
            Ok(())
        })
        .await
    }

    async fn execute(&self, label: &str, stmt: Statement) -> Result<u64> {
        retry_transient(
            || {
                let stmt = stmt.clone();
                self.run_blocking(move |conn| {
                    let affected = conn.execute(&stmt.sql, params_from_iter(stmt.args.iter()))?;
                    Ok(affected as u64)
                })
            },
            self.options,
            label,
            &stmt.sql,
        )
        .await
    }

    async fn transact(&self, label: &str, body: TxnBody) -> Result<()> {
        retry_transient(
            || {
                let body = body.clone();
                self.run_blocking(move |conn| {
                    let tx = conn.transaction()?;
                    body(&mut SqliteTxn { tx: &tx })?;
                    tx.commit()?;
                    Ok(())
                })
            },
            self.options,
            label,
            "",
        )
        .await
    }

    async fn query(&self, label: &str, stmt: Statement) -> Result<Vec<Row>> {
        retry_transient(
            || {
                let stmt = stmt.clone();
                self.run_blocking(move |conn| {
                    let mut prepared = conn.prepare_cached(&stmt.sql)?;
                    let columns = prepared.column_count();
                    let mut rows = prepared.query(params_from_iter(stmt.args.iter()))?;
                    let mut out = Vec::new();
                    while let Some(row) = rows.next()? {
                        let mut values = Vec::with_capacity(columns);
                        for i in 0..columns {
                            values.push(SqlValue::try_from(row.get_ref(i)?)?);
                        }
                        out.push(values);
                    }
                    Ok(out)
                })
            },
            self.options,
            label,
            &stmt.sql,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> EngineConfig {
        EngineConfig {
            retry_delay_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_execute_and_query_round_trip() {
        let engine = SqliteEngine::open_in_memory(&config()).unwrap();
        engine
            .execute("create", Statement::new("CREATE TABLE t (a INTEGER, b BLOB)"))
            .await
            .unwrap();
        let affected = engine
            .execute(
                "insert",
                Statement::with_args(
                    "INSERT INTO t (a, b) VALUES (?, ?), (?, ?)",
                    vec![1i64.into(), b"x".to_vec().into(), 2i64.into(), SqlValue::Null],
                ),
            )
            .await
            .unwrap();
        assert_eq!(affected, 2);

        let rows = engine
            .query("select", Statement::new("SELECT a, b FROM t ORDER BY a"))
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![SqlValue::Integer(1), SqlValue::Blob(b"x".to_vec())],
                vec![SqlValue::Integer(2), SqlValue::Null],
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let engine = SqliteEngine::open_in_memory(&config()).unwrap();
        engine
            .execute("create", Statement::new("CREATE TABLE t (a INTEGER NOT NULL)"))
            .await
            .unwrap();

        let body: TxnBody = Arc::new(|tx: &mut dyn TxnExecutor| {
            tx.execute(&Statement::new("INSERT INTO t (a) VALUES (1)"))?;
            tx.execute(&Statement::new("INSERT INTO t (a) VALUES (NULL)"))?;
            Ok(())
        });
        let err = engine.transact("insert", body).await.unwrap_err();
        assert!(matches!(err, ErrMgrError::Storage(_)));

        let rows = engine
            .query("count", Statement::new("SELECT COUNT(*) FROM t"))
            .await
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Integer(0));
    }

    #[tokio::test]
    async fn test_ensure_schema_attaches_once() {
        let engine = SqliteEngine::open_in_memory(&config()).unwrap();
        engine.ensure_schema("task_info").await.unwrap();
        engine.ensure_schema("task_info").await.unwrap();
        engine
            .execute(
                "create",
                Statement::new("CREATE TABLE `task_info`.t (a INTEGER)"),
            )
            .await
            .unwrap();
        let rows = engine
            .query(
                "list",
                Statement::new("SELECT name FROM `task_info`.sqlite_master WHERE type = 'table'"),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![SqlValue::Text("t".to_string())]]);
    }

    #[tokio::test]
    async fn test_on_disk_schema_uses_sibling_file() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("load.db");
        let engine = SqliteEngine::open(&db_path, &config()).unwrap();
        engine.ensure_schema("task_info").await.unwrap();
        engine
            .execute(
                "create",
                Statement::new("CREATE TABLE `task_info`.t (a INTEGER)"),
            )
            .await
            .unwrap();
        assert!(dir.path().join("load.task_info.db").exists());
    }
}
