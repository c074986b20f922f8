//! Async side of the error manager.
//!
//! Ingestion workers share one [`ErrorManager`]. It charges per-category
//! budgets, writes evidence rows through a [`ConflictRecorder`] and, once
//! loading is done, hands every recorded conflict back to the caller through
//! a [`ConflictResolver`] running on a bounded [`WorkerPool`].

pub mod manager;
pub mod pool;
pub mod recorder;
pub mod resolver;
pub mod summary;

pub use manager::ErrorManager;
pub use pool::{ErrorGroup, WorkerPool, WorkerSlot};
pub use recorder::ConflictRecorder;
pub use resolver::{ConflictRangeTask, ConflictResolver, DEFAULT_PAGE_SIZE};
