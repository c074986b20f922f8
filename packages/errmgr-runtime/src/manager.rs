//! The error manager handed to ingestion workers.

use std::future::Future;
use std::sync::Arc;

use errmgr_core::budget::{ErrorCategory, ThresholdTracker};
use errmgr_core::config::ErrorManagerConfig;
use errmgr_core::engine::ExecutionEngine;
use errmgr_core::error::{ErrMgrError, Result};
use errmgr_core::record::{
    DataConflictInfo, DuplicateRecord, HandleRow, IndexConflictInfo, SyntaxErrorRecord,
    TypeErrorRecord,
};
use errmgr_core::redact::Redactor;
use errmgr_core::schema::{self, ErrorTable};
use tokio_util::sync::CancellationToken;

use crate::pool::WorkerPool;
use crate::recorder::ConflictRecorder;
use crate::resolver::ConflictResolver;
use crate::summary::{self, SummaryRow};

/// Tracks load errors against their budgets, persists the evidence and
/// resolves recorded conflicts once loading is done.
///
/// Shared by reference between ingestion workers; every method takes `&self`.
pub struct ErrorManager {
    config: ErrorManagerConfig,
    /// Escaped task-info schema name
    schema: String,
    /// `None` when persistence is disabled
    engine: Option<Arc<dyn ExecutionEngine>>,
    budgets: Arc<ThresholdTracker>,
    recorder: ConflictRecorder,
}

impl ErrorManager {
    /// Creates a manager. Persistence is disabled when `engine` is `None` or
    /// the configured task-info schema is empty.
    pub fn new(engine: Option<Arc<dyn ExecutionEngine>>, config: &ErrorManagerConfig) -> Self {
        let engine = engine.filter(|_| config.persistence_enabled());
        let schema = schema::escape_identifier(&config.task_info_schema);
        let budgets = Arc::new(ThresholdTracker::new(config.budget_limits()));
        let recorder = ConflictRecorder::new(
            engine.clone(),
            schema.clone(),
            config.task_id,
            budgets.clone(),
            Redactor::new(config.redact_log),
        );
        Self {
            config: config.clone(),
            schema,
            engine,
            budgets,
            recorder,
        }
    }

    /// Configuration this manager was built from.
    pub fn config(&self) -> &ErrorManagerConfig {
        &self.config
    }

    /// Shared error budgets.
    pub fn budgets(&self) -> &ThresholdTracker {
        &self.budgets
    }

    /// Tables that can receive rows under the current configuration.
    pub fn enabled_tables(&self) -> Vec<ErrorTable> {
        let mut tables = Vec::new();
        if self.budgets.remaining(ErrorCategory::Syntax) > 0 {
            tables.push(ErrorTable::SyntaxError);
        }
        if self.budgets.remaining(ErrorCategory::Type) > 0 {
            tables.push(ErrorTable::TypeError);
        }
        if self.config.conflict_v1_enabled() {
            tables.push(ErrorTable::ConflictError);
        }
        if self.config.conflict_v2_enabled() {
            tables.push(ErrorTable::DupRecord);
        }
        tables
    }

    /// Creates the task-info schema and the error tables that can be used.
    pub async fn init(&self) -> Result<()> {
        let Some(engine) = &self.engine else {
            return Ok(());
        };
        let tables = self.enabled_tables();
        if tables.is_empty() {
            return Ok(());
        }

        engine.ensure_schema(&self.config.task_info_schema).await?;
        for table in tables {
            for stmt in table.create_statements(&self.schema) {
                engine.execute(table.create_label(), stmt).await?;
            }
        }
        tracing::debug!(
            "Initialized error tables in schema {}",
            self.config.task_info_schema
        );
        Ok(())
    }

    /// Counts a row that failed type conversion and persists it while the
    /// type budget allows.
    pub async fn record_type_error(
        &self,
        table_name: &str,
        path: &str,
        offset: i64,
        row_text: &str,
        encode_err: ErrMgrError,
    ) -> Result<()> {
        let record = TypeErrorRecord {
            table_name: table_name.to_string(),
            path: path.to_string(),
            offset,
            error: encode_err.to_string(),
            row_data: row_text.to_string(),
        };
        self.recorder.record_type_error(&record, encode_err).await
    }

    /// Counts a source fragment that failed to parse and persists it.
    pub async fn record_syntax_error(
        &self,
        table_name: &str,
        path: &str,
        offset: i64,
        context: &str,
        parse_err: ErrMgrError,
    ) -> Result<()> {
        let record = SyntaxErrorRecord {
            table_name: table_name.to_string(),
            path: path.to_string(),
            offset,
            error: parse_err.to_string(),
            context: context.to_string(),
        };
        self.recorder.record_syntax_error(&record, parse_err).await
    }

    /// Counts a charset error; nothing is written.
    pub fn record_charset_error(&self, encode_err: ErrMgrError) -> Result<()> {
        self.recorder.record_charset_error(encode_err)
    }

    /// Records a batch of primary key conflicts in one transaction.
    pub async fn record_data_conflicts(
        &self,
        table_name: &str,
        conflicts: &[DataConflictInfo],
    ) -> Result<()> {
        self.recorder.record_data_conflicts(table_name, conflicts).await
    }

    /// Records a batch of secondary index conflicts in one transaction.
    pub async fn record_index_conflicts(
        &self,
        table_name: &str,
        conflicts: &[IndexConflictInfo],
    ) -> Result<()> {
        self.recorder
            .record_index_conflicts(table_name, conflicts)
            .await
    }

    /// Charges the conflict budget for `n` duplicates without writing.
    pub fn record_duplicate_count(&self, n: i64) -> Result<()> {
        self.recorder.record_duplicate_count(n)
    }

    /// Records one duplicate row, subject to both conflict budgets.
    pub async fn record_duplicate(&self, record: &DuplicateRecord) -> Result<()> {
        self.recorder.record_duplicate(record).await
    }

    /// Records the first duplicate seen; later calls do nothing.
    pub async fn record_duplicate_once(&self, record: &DuplicateRecord) {
        self.recorder.record_duplicate_once(record).await
    }

    /// Feeds every recorded conflict of `table_name` to `resolve`.
    ///
    /// Returns immediately when persistence is disabled.
    pub async fn resolve_all_conflict_keys<F, Fut>(
        &self,
        cancel: &CancellationToken,
        table_name: &str,
        pool: &WorkerPool,
        resolve: F,
    ) -> Result<()>
    where
        F: Fn(CancellationToken, Vec<HandleRow>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let Some(engine) = &self.engine else {
            return Ok(());
        };
        ConflictResolver::new(engine.clone(), &self.schema, self.config.resolve_page_size)
            .resolve_all(cancel, table_name, pool, resolve)
            .await
    }

    /// Type errors still tolerated; negative once exceeded.
    pub fn type_errors_remain(&self) -> i64 {
        self.budgets.remaining(ErrorCategory::Type)
    }

    /// Conflicts still tolerated; negative once exceeded.
    pub fn conflict_errors_remain(&self) -> i64 {
        self.budgets.remaining(ErrorCategory::Conflict)
    }

    /// Duplicate rows that may still be persisted.
    pub fn conflict_records_remain(&self) -> i64 {
        self.budgets.remaining(ErrorCategory::ConflictRecord)
    }

    /// Returns `true` once a single-shot duplicate has been recorded.
    pub fn record_error_once(&self) -> bool {
        self.recorder.record_error_once()
    }

    /// Returns `true` if any type, syntax, charset or conflict error was seen.
    pub fn has_error(&self) -> bool {
        self.budgets.has_error()
    }

    /// Table holding conflict evidence under the current configuration.
    fn conflict_table(&self) -> &'static str {
        if self.config.conflict_v1_enabled() {
            schema::CONFLICT_ERROR_TABLE
        } else {
            schema::DUP_RECORD_TABLE
        }
    }

    fn summary_rows(&self) -> Vec<SummaryRow> {
        let qualified = |table: &str| schema::fmt_table_name(&self.schema, table);
        let candidates = [
            (
                ErrorCategory::Type,
                "Data Type",
                qualified(schema::TYPE_ERROR_TABLE),
            ),
            (
                ErrorCategory::Syntax,
                "Data Syntax",
                qualified(schema::SYNTAX_ERROR_TABLE),
            ),
            (ErrorCategory::Charset, "Charset Error", String::new()),
            (
                ErrorCategory::Conflict,
                "Unique Key Conflict",
                qualified(self.conflict_table()),
            ),
        ];
        candidates
            .into_iter()
            .filter_map(|(category, kind, table)| {
                let count = self.budgets.error_count(category);
                (count > 0).then_some(SummaryRow { kind, count, table })
            })
            .collect()
    }

    /// Logs one warning per error category that saw errors.
    pub fn log_error_details(&self) {
        for row in self.summary_rows() {
            if row.table.is_empty() {
                tracing::warn!("Detect {} {} errors in total", row.count, row.kind);
            } else {
                tracing::warn!(
                    "Detect {} {} errors in total, please refer to table {} for more details",
                    row.count,
                    row.kind,
                    row.table
                );
            }
        }
    }

    /// Human readable error summary, empty when no error was seen.
    pub fn output(&self) -> String {
        if !self.has_error() {
            return String::new();
        }
        summary::render(&self.summary_rows())
    }
}
