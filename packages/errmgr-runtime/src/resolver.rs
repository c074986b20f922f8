//! Concurrent re-resolution of recorded conflicts.
//!
//! The row id space of a table's persisted conflicts is scanned page by page.
//! A worker that still has more than a page left in its range splits off the
//! upper half, but only when a worker slot is free at that moment, and hands
//! it to the dispatcher together with the slot. Ranges therefore only split
//! when they can run in parallel, and a pool of one scans in ascending order.
//!
//! Every range that exists but has not finished is counted. The dispatcher
//! stops when the count reaches zero, or as soon as the run is cancelled.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use errmgr_core::engine::{ExecutionEngine, Row, SqlValue};
use errmgr_core::error::{ErrMgrError, Result};
use errmgr_core::record::HandleRow;
use errmgr_core::schema;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::pool::{ErrorGroup, WorkerPool, WorkerSlot};

/// Rows fetched per page query.
pub const DEFAULT_PAGE_SIZE: i64 = 1000;

/// A half-open interval `[start, end)` of conflict row ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRangeTask {
    pub start: i64,
    pub end: i64,
}

impl ConflictRangeTask {
    /// The whole row id space.
    pub fn full() -> Self {
        Self {
            start: 0,
            end: i64::MAX,
        }
    }

    /// Width of the interval.
    pub fn span(&self) -> i64 {
        self.end - self.start
    }

    /// Splits at the midpoint into a lower and an upper half.
    pub fn split(self) -> (Self, Self) {
        let mid = self.start + self.span() / 2;
        (
            Self {
                start: self.start,
                end: mid,
            },
            Self {
                start: mid,
                end: self.end,
            },
        )
    }
}

/// A range waiting to be scheduled, with the slot reserved for it if any.
struct PendingRange {
    range: ConflictRangeTask,
    slot: Option<WorkerSlot>,
}

/// Count of ranges that exist but have not finished.
struct Outstanding {
    count: AtomicUsize,
    drained: watch::Sender<bool>,
}

impl Outstanding {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(1),
            drained: watch::Sender::new(false),
        }
    }

    fn add(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Takes back an `add` whose range was never handed off.
    fn undo_add(&self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.send_replace(true);
        }
    }
}

/// Marks a range finished when the worker exits, however it exits.
struct RangeDone(Arc<Outstanding>);

impl Drop for RangeDone {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Scans persisted conflicts and feeds them to a resolution callback.
pub struct ConflictResolver {
    engine: Arc<dyn ExecutionEngine>,
    /// Escaped task-info schema name
    schema: Arc<str>,
    page_size: i64,
}

impl ConflictResolver {
    pub fn new(engine: Arc<dyn ExecutionEngine>, schema: &str, page_size: i64) -> Self {
        Self {
            engine,
            schema: Arc::from(schema),
            page_size: page_size.max(1),
        }
    }

    /// Rows fetched per page query.
    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    /// Passes every persisted conflict of `table_name` to `resolve` exactly
    /// once, a page at a time, on at most `pool.size()` concurrent workers.
    ///
    /// The first failure cancels every worker and is returned. Cancelling
    /// `cancel` stops the run with [`ErrMgrError::Cancelled`].
    pub async fn resolve_all<F, Fut>(
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
        let mut group = ErrorGroup::new(cancel);
        let token = group.token();
        let outstanding = Arc::new(Outstanding::new());
        let mut drained = outstanding.drained.subscribe();
        let (intake, mut pending) = mpsc::channel::<PendingRange>(pool.size() + 1);

        let scan = RangeScan {
            engine: self.engine.clone(),
            schema: self.schema.clone(),
            table_name: Arc::from(table_name),
            page_size: self.page_size,
            pool: pool.clone(),
            intake,
            outstanding: outstanding.clone(),
            resolve: Arc::new(resolve),
            cancel: token.clone(),
        };
        scan.intake
            .try_send(PendingRange {
                range: ConflictRangeTask::full(),
                slot: None,
            })
            .map_err(|_| ErrMgrError::Resolution("range intake rejected the seed".to_string()))?;

        let mut interrupted = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    interrupted = true;
                    break;
                }
                next = pending.recv() => next,
                _ = async {
                    let _ = drained.wait_for(|done| *done).await;
                } => break,
            };
            let Some(PendingRange { range, slot }) = next else {
                break;
            };
            let slot = match slot {
                Some(slot) => slot,
                None => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        interrupted = true;
                        break;
                    }
                    slot = pool.acquire() => slot?,
                },
            };
            group.spawn_on_slot(slot, scan.clone().run(range));
        }
        // Queued ranges give back their slots here.
        drop(pending);

        let result = group.wait().await;
        if result.is_ok() && interrupted {
            return Err(ErrMgrError::Cancelled);
        }
        tracing::debug!(
            "Finished resolving conflicts of {} on pool {}",
            table_name,
            pool.name()
        );
        result
    }
}

/// Everything a worker needs to scan one range.
struct RangeScan<F> {
    engine: Arc<dyn ExecutionEngine>,
    schema: Arc<str>,
    table_name: Arc<str>,
    page_size: i64,
    pool: WorkerPool,
    intake: mpsc::Sender<PendingRange>,
    outstanding: Arc<Outstanding>,
    resolve: Arc<F>,
    cancel: CancellationToken,
}

impl<F> Clone for RangeScan<F> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            schema: self.schema.clone(),
            table_name: self.table_name.clone(),
            page_size: self.page_size,
            pool: self.pool.clone(),
            intake: self.intake.clone(),
            outstanding: self.outstanding.clone(),
            resolve: self.resolve.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<F, Fut> RangeScan<F>
where
    F: Fn(CancellationToken, Vec<HandleRow>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(self, mut range: ConflictRangeTask) -> Result<()> {
        let _done = RangeDone(self.outstanding.clone());

        while range.start < range.end {
            if self.cancel.is_cancelled() {
                return Err(ErrMgrError::Cancelled);
            }
            let stmt = schema::select_conflict_keys(
                &self.schema,
                &self.table_name,
                range.start,
                range.end,
                self.page_size,
            );
            let rows = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ErrMgrError::Cancelled),
                rows = self.engine.query("select conflict keys", stmt) => rows?,
            };
            if rows.is_empty() {
                break;
            }

            let (last_row_id, batch) = decode_page(rows)?;
            (self.resolve)(self.cancel.clone(), batch).await?;
            range.start = last_row_id + 1;

            if range.span() > self.page_size {
                range = self.offer_upper_half(range);
            }
        }
        Ok(())
    }

    /// Hands the upper half of `range` to another worker if a slot is free
    /// now, returning what this worker keeps scanning.
    fn offer_upper_half(&self, range: ConflictRangeTask) -> ConflictRangeTask {
        let Some(slot) = self.pool.try_acquire() else {
            return range;
        };
        let (lower, upper) = range.split();
        self.outstanding.add();
        match self.intake.try_send(PendingRange {
            range: upper,
            slot: Some(slot),
        }) {
            Ok(()) => {
                tracing::debug!(
                    "Split conflict range of {}: [{}, {}) handed off",
                    self.table_name,
                    upper.start,
                    upper.end
                );
                lower
            }
            Err(_) => {
                self.outstanding.undo_add();
                range
            }
        }
    }
}

/// Decodes `rowid, raw_handle, raw_row` rows, returning the last row id.
fn decode_page(rows: Vec<Row>) -> Result<(i64, Vec<HandleRow>)> {
    let mut last_row_id = 0;
    let mut batch = Vec::with_capacity(rows.len());
    for row in rows {
        let [row_id, handle, raw_row]: [SqlValue; 3] = row.try_into().map_err(|row: Row| {
            ErrMgrError::Decode(format!("expected 3 conflict columns, got {}", row.len()))
        })?;
        last_row_id = row_id
            .as_i64()
            .ok_or_else(|| ErrMgrError::Decode(format!("invalid conflict row id {:?}", row_id)))?;
        batch.push(HandleRow::new(handle.into_bytes()?, raw_row.into_bytes()?));
    }
    Ok((last_row_id, batch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_halves_range() {
        let (lower, upper) = ConflictRangeTask { start: 10, end: 20 }.split();
        assert_eq!(lower, ConflictRangeTask { start: 10, end: 15 });
        assert_eq!(upper, ConflictRangeTask { start: 15, end: 20 });

        let (lower, upper) = ConflictRangeTask::full().split();
        assert_eq!(lower.end, upper.start);
        assert_eq!(upper.end, i64::MAX);
    }

    #[test]
    fn test_decode_page_reports_last_row_id() {
        let rows = vec![
            vec![
                SqlValue::Integer(3),
                SqlValue::Blob(b"h3".to_vec()),
                SqlValue::Blob(b"r3".to_vec()),
            ],
            vec![
                SqlValue::Integer(9),
                SqlValue::Blob(b"h9".to_vec()),
                SqlValue::Text("r9".to_string()),
            ],
        ];
        let (last, batch) = decode_page(rows).unwrap();
        assert_eq!(last, 9);
        assert_eq!(batch[1], HandleRow::new(b"h9".to_vec(), b"r9".to_vec()));
    }

    #[test]
    fn test_decode_page_rejects_short_rows() {
        let err = decode_page(vec![vec![SqlValue::Integer(1)]]).unwrap_err();
        assert!(matches!(err, ErrMgrError::Decode(_)));
    }

    #[test]
    fn test_outstanding_signals_when_drained() {
        let outstanding = Outstanding::new();
        let drained = outstanding.drained.subscribe();
        outstanding.add();
        outstanding.done();
        assert!(!*drained.borrow());
        outstanding.done();
        assert!(*drained.borrow());
    }
}
