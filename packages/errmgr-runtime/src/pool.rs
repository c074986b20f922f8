//! Bounded worker pool and error group for async workers.

use std::future::Future;
use std::sync::Arc;

use errmgr_core::error::{ErrMgrError, Result};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A reserved worker slot. The slot is released when dropped.
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

/// Limits how many workers run at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    /// Pool name used in logs
    name: String,
    /// Maximum concurrent workers
    size: usize,
    /// Free worker slots
    slots: Arc<Semaphore>,
}

impl WorkerPool {
    /// Creates a pool running at most `size` workers at once (at least one).
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name: name.into(),
            size,
            slots: Arc::new(Semaphore::new(size)),
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum concurrent workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of slots free right now.
    pub fn idle(&self) -> usize {
        self.slots.available_permits()
    }

    /// Waits for a free worker slot.
    pub async fn acquire(&self) -> Result<WorkerSlot> {
        let permit = self.slots.clone().acquire_owned().await.map_err(|_| {
            ErrMgrError::WorkerPanic(format!("worker pool {} is closed", self.name))
        })?;
        Ok(WorkerSlot { _permit: permit })
    }

    /// Takes a worker slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<WorkerSlot> {
        self.slots
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| WorkerSlot { _permit: permit })
    }

    /// Waits for a free slot, then runs `fut` on it inside `group`.
    pub async fn apply_on_error_group<F>(&self, group: &mut ErrorGroup, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let slot = self.acquire().await?;
        group.spawn_on_slot(slot, fut);
        Ok(())
    }
}

/// A set of tasks where the first failure cancels the rest.
#[derive(Debug)]
pub struct ErrorGroup {
    /// Running tasks
    tasks: JoinSet<()>,
    /// Cancelled when any task fails
    cancel: CancellationToken,
    /// First error reported by a task
    first_error: Arc<Mutex<Option<ErrMgrError>>>,
}

impl ErrorGroup {
    /// Creates a group whose token is a child of `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Token cancelled on the first failure or when the parent is cancelled.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns `fut` as a member of the group.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let first_error = self.first_error.clone();
        self.tasks.spawn(async move {
            if let Err(err) = fut.await {
                record_first(&first_error, &cancel, err);
            }
        });
    }

    /// Spawns `fut` holding `slot` until it finishes.
    pub fn spawn_on_slot<F>(&mut self, slot: WorkerSlot, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.spawn(async move {
            let _slot = slot;
            fut.await
        });
    }

    /// Waits for every task and returns the first error, if any.
    pub async fn wait(mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(join_err) = joined {
                let err = ErrMgrError::WorkerPanic(join_err.to_string());
                record_first(&self.first_error, &self.cancel, err);
            }
        }
        match self.first_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn record_first(
    slot: &Mutex<Option<ErrMgrError>>,
    cancel: &CancellationToken,
    err: ErrMgrError,
) {
    let mut first = slot.lock();
    if first.is_none() {
        *first = Some(err);
    }
    cancel.cancel();
}
