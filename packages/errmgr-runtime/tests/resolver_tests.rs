//! Conflict resolution over large and failing tables.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use errmgr_core::error::ErrMgrError;
use errmgr_core::record::HandleRow;
use errmgr_runtime::{ConflictResolver, WorkerPool};
use ntest::timeout;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use common::{handle_id, runtime, RangeEngine};

const ROWS: i64 = 1_000_000;

/// Sparse row ids: 7, 14, ..., 7 * ROWS.
fn sparse_ids() -> impl Iterator<Item = i64> {
    (1..=ROWS).map(|i| i * 7)
}

fn resolver(engine: Arc<RangeEngine>) -> ConflictResolver {
    ConflictResolver::new(engine, "`task_info`", 1000)
}

/// Resolves `engine` on `pool`, returning every handle id seen in call order.
async fn collect_all(
    engine: Arc<RangeEngine>,
    pool: &WorkerPool,
) -> errmgr_core::Result<Vec<i64>> {
    collect_with_page_size(engine, pool, 1000).await
}

async fn collect_with_page_size(
    engine: Arc<RangeEngine>,
    pool: &WorkerPool,
    page_size: i64,
) -> errmgr_core::Result<Vec<i64>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ConflictResolver::new(engine, "`task_info`", page_size)
        .resolve_all(
            &CancellationToken::new(),
            "orders",
            pool,
            move |_cancel, batch: Vec<HandleRow>| {
                let sink = sink.clone();
                async move {
                    sink.lock()
                        .extend(batch.iter().map(|row| handle_id(&row.handle)));
                    Ok::<(), ErrMgrError>(())
                }
            },
        )
        .await?;
    let ids = seen.lock().clone();
    Ok(ids)
}

#[timeout(60000)]
#[test]
fn test_single_worker_visits_every_row_in_order() {
    runtime().block_on(async {
        let engine = Arc::new(RangeEngine::new(sparse_ids()));
        let pool = WorkerPool::new("resolve", 1);

        let seen = collect_all(engine.clone(), &pool).await.unwrap();

        // One worker never splits, so pages arrive in ascending order
        let expected: Vec<i64> = sparse_ids().collect();
        assert_eq!(seen, expected);
        assert_eq!(engine.queries(), (ROWS / 1000) as usize + 1);
        assert_eq!(pool.idle(), 1);
    });
}

#[timeout(60000)]
#[test]
fn test_parallel_workers_visit_every_row_once() {
    runtime().block_on(async {
        let engine = Arc::new(RangeEngine::new(sparse_ids()));
        let pool = WorkerPool::new("resolve", 8);

        let mut seen = collect_all(engine, &pool).await.unwrap();

        assert_eq!(seen.len(), ROWS as usize);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), ROWS as usize);
        assert!(seen.iter().copied().eq(sparse_ids()));
        assert_eq!(pool.idle(), 8);
    });
}

#[timeout(60000)]
#[test]
fn test_dense_ids_from_zero_for_any_page_size() {
    const DENSE: i64 = 20_000;
    runtime().block_on(async {
        for page_size in [1, 7, 4096] {
            let engine = Arc::new(RangeEngine::new(0..DENSE));
            let pool = WorkerPool::new("resolve", 1);
            let seen = collect_with_page_size(engine.clone(), &pool, page_size)
                .await
                .unwrap();
            assert!(seen.iter().copied().eq(0..DENSE), "page size {}", page_size);
            // One query per page plus the final empty one
            let pages = (DENSE + page_size - 1) / page_size;
            assert_eq!(engine.queries(), pages as usize + 1, "page size {}", page_size);

            let engine = Arc::new(RangeEngine::new(0..DENSE));
            let pool = WorkerPool::new("resolve", 8);
            let mut seen = collect_with_page_size(engine, &pool, page_size)
                .await
                .unwrap();
            assert_eq!(seen.len(), DENSE as usize, "page size {}", page_size);
            seen.sort_unstable();
            assert!(seen.iter().copied().eq(0..DENSE), "page size {}", page_size);
            assert_eq!(pool.idle(), 8);
        }
    });
}

#[timeout(10000)]
#[test]
fn test_empty_table_never_calls_back() {
    runtime().block_on(async {
        let engine = Arc::new(RangeEngine::new(std::iter::empty()));
        let pool = WorkerPool::new("resolve", 4);

        let seen = collect_all(engine.clone(), &pool).await.unwrap();

        assert!(seen.is_empty());
        assert_eq!(engine.queries(), 1);
    });
}

#[timeout(10000)]
#[test]
fn test_query_failure_stops_the_run() {
    runtime().block_on(async {
        let engine = Arc::new(RangeEngine::new(sparse_ids()).failing_from(20));
        let pool = WorkerPool::new("resolve", 4);

        let err = collect_all(engine, &pool).await.unwrap_err();

        assert_eq!(
            err,
            ErrMgrError::Storage("injected query failure".to_string())
        );
        assert_eq!(pool.idle(), 4);
    });
}

#[timeout(10000)]
#[test]
fn test_callback_failure_cancels_other_workers() {
    runtime().block_on(async {
        let engine = Arc::new(RangeEngine::new(sparse_ids()));
        let pool = WorkerPool::new("resolve", 4);
        let batches = Arc::new(AtomicUsize::new(0));
        let queries_at_failure = Arc::new(AtomicUsize::new(0));
        let counter = batches.clone();
        let snapshot = queries_at_failure.clone();
        let scanned = engine.clone();

        let err = resolver(engine.clone())
            .resolve_all(
                &CancellationToken::new(),
                "orders",
                &pool,
                move |_cancel: CancellationToken, _batch: Vec<HandleRow>| {
                    let counter = counter.clone();
                    let snapshot = snapshot.clone();
                    let scanned = scanned.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 10 {
                            snapshot.store(scanned.queries(), Ordering::SeqCst);
                            return Err(ErrMgrError::Resolution("bad handle".to_string()));
                        }
                        Ok(())
                    }
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err, ErrMgrError::Resolution("bad handle".to_string()));
        assert!(batches.load(Ordering::SeqCst) < (ROWS / 1000) as usize);
        // At most one page query per worker was already under way
        let at_failure = queries_at_failure.load(Ordering::SeqCst);
        assert!(at_failure > 0);
        assert!(
            engine.queries() <= at_failure + pool.size(),
            "{} queries, {} at failure",
            engine.queries(),
            at_failure
        );
        assert_eq!(pool.idle(), 4);
    });
}

#[timeout(10000)]
#[test]
fn test_cancelled_run_reports_cancellation() {
    runtime().block_on(async {
        let engine = Arc::new(RangeEngine::new(sparse_ids()));
        let pool = WorkerPool::new("resolve", 2);
        let parent = CancellationToken::new();
        let trigger = parent.clone();

        let err = resolver(engine)
            .resolve_all(
                &parent,
                "orders",
                &pool,
                move |_cancel: CancellationToken, _batch: Vec<HandleRow>| {
                    trigger.cancel();
                    async { Ok::<(), ErrMgrError>(()) }
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err, ErrMgrError::Cancelled);
        assert_eq!(pool.idle(), 2);
    });
}

#[timeout(10000)]
#[test]
fn test_pre_cancelled_run_does_no_work() {
    runtime().block_on(async {
        let engine = Arc::new(RangeEngine::new(sparse_ids()));
        let pool = WorkerPool::new("resolve", 2);
        let parent = CancellationToken::new();
        parent.cancel();

        let err = resolver(engine.clone())
            .resolve_all(&parent, "orders", &pool, |_, _| async {
                Ok::<(), ErrMgrError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err, ErrMgrError::Cancelled);
        assert_eq!(engine.queries(), 0);
    });
}
