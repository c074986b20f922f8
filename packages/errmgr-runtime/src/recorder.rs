//! Budgeted persistence of rejected and conflicting rows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use errmgr_core::budget::{ErrorCategory, ThresholdTracker};
use errmgr_core::engine::{ExecutionEngine, Statement, TxnBody, TxnExecutor};
use errmgr_core::error::{ErrMgrError, Result};
use errmgr_core::record::{
    DataConflictInfo, DuplicateRecord, IndexConflictInfo, SyntaxErrorRecord, TypeErrorRecord,
};
use errmgr_core::redact::Redactor;
use errmgr_core::schema;

/// Charges error budgets and writes the evidence rows.
///
/// Without an engine every call still charges its budget and reports
/// exhaustion, but nothing is written.
pub struct ConflictRecorder {
    engine: Option<Arc<dyn ExecutionEngine>>,
    /// Escaped task-info schema name
    schema: String,
    task_id: i64,
    budgets: Arc<ThresholdTracker>,
    /// Set by the first `record_duplicate_once` call
    record_error_once: AtomicBool,
    redactor: Redactor,
}

impl ConflictRecorder {
    pub fn new(
        engine: Option<Arc<dyn ExecutionEngine>>,
        schema: String,
        task_id: i64,
        budgets: Arc<ThresholdTracker>,
        redactor: Redactor,
    ) -> Self {
        Self {
            engine,
            schema,
            task_id,
            budgets,
            record_error_once: AtomicBool::new(false),
            redactor,
        }
    }

    /// Returns `true` once `record_duplicate_once` has been called.
    pub fn record_error_once(&self) -> bool {
        self.record_error_once.load(Ordering::Acquire)
    }

    /// Records primary key conflicts of `table_name`.
    ///
    /// The whole batch is written even when it exceeds the conflict budget.
    /// A write failure is returned in place of the budget error.
    pub async fn record_data_conflicts(
        &self,
        table_name: &str,
        conflicts: &[DataConflictInfo],
    ) -> Result<()> {
        if conflicts.is_empty() {
            return Ok(());
        }
        let admitted = self
            .budgets
            .admit(ErrorCategory::Conflict, conflicts.len() as i64);
        let Some(engine) = &self.engine else {
            return admitted;
        };

        let stmts =
            schema::insert_data_conflicts(&self.schema, self.task_id, table_name, conflicts);
        engine
            .transact("insert data conflict error record", statements_body(stmts))
            .await?;
        admitted
    }

    /// Records secondary index conflicts of `table_name`.
    ///
    /// Same budget and write rules as [`record_data_conflicts`](Self::record_data_conflicts).
    pub async fn record_index_conflicts(
        &self,
        table_name: &str,
        conflicts: &[IndexConflictInfo],
    ) -> Result<()> {
        if conflicts.is_empty() {
            return Ok(());
        }
        let admitted = self
            .budgets
            .admit(ErrorCategory::Conflict, conflicts.len() as i64);
        let Some(engine) = &self.engine else {
            return admitted;
        };

        let stmts =
            schema::insert_index_conflicts(&self.schema, self.task_id, table_name, conflicts);
        engine
            .transact("insert index conflict error record", statements_body(stmts))
            .await?;
        admitted
    }

    /// Charges the conflict budget by `n` without writing anything.
    pub fn record_duplicate_count(&self, n: i64) -> Result<()> {
        self.budgets.admit(ErrorCategory::Conflict, n)
    }

    /// Records one duplicate row.
    ///
    /// An exhausted conflict budget is returned without writing. Once the
    /// record-row budget is spent the call succeeds without writing.
    pub async fn record_duplicate(&self, record: &DuplicateRecord) -> Result<()> {
        self.budgets.admit(ErrorCategory::Conflict, 1)?;
        let Some(engine) = &self.engine else {
            return Ok(());
        };
        if self.budgets.try_admit(ErrorCategory::ConflictRecord, 1) < 0 {
            return Ok(());
        }
        self.write_duplicate(engine.as_ref(), record).await
    }

    /// Records a duplicate row only on the first call in this process.
    ///
    /// Later calls do nothing. A failed write is logged, not returned.
    pub async fn record_duplicate_once(&self, record: &DuplicateRecord) {
        if self
            .record_error_once
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(engine) = &self.engine else {
            return;
        };
        if let Err(err) = self.write_duplicate(engine.as_ref(), record).await {
            tracing::warn!(
                table = %record.table_name,
                path = %record.path,
                offset = record.offset,
                row = self.redactor.string(&record.row_data),
                "Failed to record duplicate: {}",
                err
            );
        }
    }

    async fn write_duplicate(
        &self,
        engine: &dyn ExecutionEngine,
        record: &DuplicateRecord,
    ) -> Result<()> {
        let stmt = schema::insert_duplicate(&self.schema, self.task_id, record);
        engine.execute("insert duplicate record", stmt).await?;
        Ok(())
    }

    /// Records a row that failed type conversion.
    ///
    /// `encode_err` is the conversion failure; it is returned, annotated
    /// with the threshold, once the type budget is exhausted.
    pub async fn record_type_error(
        &self,
        record: &TypeErrorRecord,
        encode_err: ErrMgrError,
    ) -> Result<()> {
        tracing::debug!(
            table = %record.table_name,
            path = %record.path,
            offset = record.offset,
            row = self.redactor.string(&record.row_data),
            "Recording type error: {}",
            encode_err
        );
        self.charge_row_error(ErrorCategory::Type, &encode_err)?;
        let Some(engine) = &self.engine else {
            return Ok(());
        };
        let stmt = schema::insert_type_error(&self.schema, self.task_id, record);
        engine
            .execute("insert type error record", stmt)
            .await
            .map(|_| ())
            .map_err(|err| ErrMgrError::compound(encode_err, err))
    }

    /// Records a source fragment that failed to parse.
    pub async fn record_syntax_error(
        &self,
        record: &SyntaxErrorRecord,
        parse_err: ErrMgrError,
    ) -> Result<()> {
        tracing::debug!(
            table = %record.table_name,
            path = %record.path,
            offset = record.offset,
            context = self.redactor.string(&record.context),
            "Recording syntax error: {}",
            parse_err
        );
        self.charge_row_error(ErrorCategory::Syntax, &parse_err)?;
        let Some(engine) = &self.engine else {
            return Ok(());
        };
        let stmt = schema::insert_syntax_error(&self.schema, self.task_id, record);
        engine
            .execute("insert syntax error record", stmt)
            .await
            .map(|_| ())
            .map_err(|err| ErrMgrError::compound(parse_err, err))
    }

    /// Counts a charset error. Charset errors are never written.
    pub fn record_charset_error(&self, encode_err: ErrMgrError) -> Result<()> {
        self.charge_row_error(ErrorCategory::Charset, &encode_err)
    }

    /// Charges one row error, returning the row's own error once the
    /// category is exhausted.
    fn charge_row_error(&self, category: ErrorCategory, err: &ErrMgrError) -> Result<()> {
        if self.budgets.try_admit(category, 1) >= 0 {
            return Ok(());
        }
        let threshold = self.budgets.limit(category);
        if threshold > 0 {
            Err(ErrMgrError::RowThresholdExceeded {
                message: err.to_string(),
                category: category.name(),
                key: category.config_key(),
                threshold,
            })
        } else {
            Err(err.clone())
        }
    }
}

/// Runs `stmts` in order as one transaction body.
fn statements_body(stmts: Vec<Statement>) -> TxnBody {
    Arc::new(move |tx: &mut dyn TxnExecutor| {
        for stmt in &stmts {
            tx.execute(stmt)?;
        }
        Ok(())
    })
}
