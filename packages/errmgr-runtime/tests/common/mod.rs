//! Shared fixtures for runtime integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use errmgr_core::engine::{ExecutionEngine, Row, SqlValue, Statement, TxnBody};
use errmgr_core::error::{ErrMgrError, Result};

/// Builds a multi-threaded runtime for tests wrapped in `ntest::timeout`.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

/// Read-only engine answering conflict page queries from an id set.
///
/// Each row's handle is its id in big-endian bytes and its row is empty.
pub struct RangeEngine {
    ids: BTreeSet<i64>,
    queries: AtomicUsize,
    /// Query number (1-based) from which every query fails
    fail_from: Option<usize>,
}

impl RangeEngine {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            queries: AtomicUsize::new(0),
            fail_from: None,
        }
    }

    pub fn failing_from(mut self, query: usize) -> Self {
        self.fail_from = Some(query);
        self
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

pub fn handle_id(handle: &[u8]) -> i64 {
    let bytes: [u8; 8] = handle.try_into().unwrap();
    i64::from_be_bytes(bytes)
}

fn arg(stmt: &Statement, i: usize) -> i64 {
    stmt.args[i].as_i64().unwrap()
}

#[async_trait]
impl ExecutionEngine for RangeEngine {
    async fn ensure_schema(&self, _schema: &str) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _label: &str, _stmt: Statement) -> Result<u64> {
        Err(ErrMgrError::Storage("read-only engine".to_string()))
    }

    async fn transact(&self, _label: &str, _body: TxnBody) -> Result<()> {
        Err(ErrMgrError::Storage("read-only engine".to_string()))
    }

    async fn query(&self, _label: &str, stmt: Statement) -> Result<Vec<Row>> {
        let n = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        if self.fail_from.is_some_and(|from| n >= from) {
            return Err(ErrMgrError::Storage("injected query failure".to_string()));
        }

        // Arguments: table name, start, end, limit
        let (start, end, limit) = (arg(&stmt, 1), arg(&stmt, 2), arg(&stmt, 3));
        Ok(self
            .ids
            .range(start..end)
            .take(limit as usize)
            .map(|id| {
                vec![
                    SqlValue::Integer(*id),
                    SqlValue::Blob(id.to_be_bytes().to_vec()),
                    SqlValue::Blob(Vec::new()),
                ]
            })
            .collect())
    }
}

/// Engine whose writes always fail.
pub struct FailingEngine;

#[async_trait]
impl ExecutionEngine for FailingEngine {
    async fn ensure_schema(&self, _schema: &str) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _label: &str, _stmt: Statement) -> Result<u64> {
        Err(ErrMgrError::Storage("disk full".to_string()))
    }

    async fn transact(&self, _label: &str, _body: TxnBody) -> Result<()> {
        Err(ErrMgrError::Storage("disk full".to_string()))
    }

    async fn query(&self, _label: &str, _stmt: Statement) -> Result<Vec<Row>> {
        Err(ErrMgrError::Storage("disk full".to_string()))
    }
}
