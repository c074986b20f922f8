//! Error accounting primitives for bulk data loading.
//!
//! Provides per-category error budgets, the evidence records written for
//! rejected and conflicting rows, the statements that persist them, and a
//! retrying execution engine.

pub mod budget;
pub mod config;
pub mod engine;
pub mod error;
pub mod record;
pub mod redact;
pub mod schema;

pub use budget::{BudgetLimits, ErrorCategory, ThresholdTracker};
pub use config::ErrorManagerConfig;
pub use engine::{ExecutionEngine, SqlValue, SqliteEngine, Statement};
pub use error::{ErrMgrError, Result};
pub use redact::Redactor;
