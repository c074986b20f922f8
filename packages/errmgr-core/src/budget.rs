//! Per-category error budgets shared by concurrent ingestion workers.
//!
//! Each category owns one signed counter initialised to its configured limit.
//! Admissions subtract from the counter with a single `fetch_sub`; a category
//! is exhausted once the counter drops below zero and stays exhausted for the
//! lifetime of the tracker. Read-outs across categories are not taken under a
//! common lock and may mix slightly different points in time.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::ErrMgrError;

/// Kinds of load errors with an independent budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed source data
    Syntax,
    /// Values that cannot be converted to the column type
    Type,
    /// Invalid character set encoding
    Charset,
    /// Unique or primary key conflicts
    Conflict,
    /// Conflicting rows kept as evidence
    ConflictRecord,
}

impl ErrorCategory {
    /// All categories, in summary order.
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::Type,
        ErrorCategory::Syntax,
        ErrorCategory::Charset,
        ErrorCategory::Conflict,
        ErrorCategory::ConflictRecord,
    ];

    fn index(self) -> usize {
        match self {
            ErrorCategory::Syntax => 0,
            ErrorCategory::Type => 1,
            ErrorCategory::Charset => 2,
            ErrorCategory::Conflict => 3,
            ErrorCategory::ConflictRecord => 4,
        }
    }

    /// Configuration key that sets this category's limit.
    pub fn config_key(self) -> &'static str {
        match self {
            ErrorCategory::Syntax => "max-error.syntax",
            ErrorCategory::Type => "max-error.type",
            ErrorCategory::Charset => "max-error.charset",
            ErrorCategory::Conflict => "conflict.threshold",
            ErrorCategory::ConflictRecord => "conflict.max-record-rows",
        }
    }

    /// Short lowercase name used in messages.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Type => "type",
            ErrorCategory::Charset => "charset",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::ConflictRecord => "conflict record",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configured limits, one per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BudgetLimits {
    pub syntax: i64,
    pub type_error: i64,
    pub charset: i64,
    pub conflict: i64,
    pub conflict_record: i64,
}

impl BudgetLimits {
    fn to_array(self) -> [i64; 5] {
        [
            self.syntax,
            self.type_error,
            self.charset,
            self.conflict,
            self.conflict_record,
        ]
    }
}

/// Lock-free error budgets.
#[derive(Debug)]
pub struct ThresholdTracker {
    /// Immutable configured limits
    limits: [i64; 5],
    /// Remaining budget per category
    remaining: [AtomicI64; 5],
}

impl ThresholdTracker {
    /// Creates a tracker with every counter set to its limit.
    pub fn new(limits: BudgetLimits) -> Self {
        let limits = limits.to_array();
        Self {
            limits,
            remaining: limits.map(AtomicI64::new),
        }
    }

    /// Charges `n` errors to `category` and returns the budget left afterwards.
    ///
    /// A negative return value means this call pushed the category past its
    /// limit (or it already was). The caller still records its evidence.
    pub fn try_admit(&self, category: ErrorCategory, n: i64) -> i64 {
        self.remaining[category.index()].fetch_sub(n, Ordering::AcqRel) - n
    }

    /// Like [`try_admit`](Self::try_admit) but returns the threshold error when the
    /// budget is exceeded.
    pub fn admit(&self, category: ErrorCategory, n: i64) -> Result<(), ErrMgrError> {
        if self.try_admit(category, n) < 0 {
            return Err(self.exceeded(category));
        }
        Ok(())
    }

    /// Builds the threshold error for `category`.
    pub fn exceeded(&self, category: ErrorCategory) -> ErrMgrError {
        ErrMgrError::ThresholdExceeded {
            category: category.name(),
            key: category.config_key(),
            threshold: self.limit(category),
        }
    }

    /// Configured limit of `category`.
    pub fn limit(&self, category: ErrorCategory) -> i64 {
        self.limits[category.index()]
    }

    /// Budget currently left; negative once exhausted.
    pub fn remaining(&self, category: ErrorCategory) -> i64 {
        self.remaining[category.index()].load(Ordering::Acquire)
    }

    /// Returns `true` once `category` has been driven below zero.
    pub fn is_exhausted(&self, category: ErrorCategory) -> bool {
        self.remaining(category) < 0
    }

    /// Number of errors observed within the limit: `limit - max(remaining, 0)`.
    pub fn error_count(&self, category: ErrorCategory) -> i64 {
        self.limit(category) - self.remaining(category).max(0)
    }

    /// Number of errors charged beyond the limit.
    pub fn excess(&self, category: ErrorCategory) -> i64 {
        (-self.remaining(category)).max(0)
    }

    /// Returns `true` if any type, syntax, charset or conflict error was seen.
    pub fn has_error(&self) -> bool {
        [
            ErrorCategory::Type,
            ErrorCategory::Syntax,
            ErrorCategory::Charset,
            ErrorCategory::Conflict,
        ]
        .into_iter()
        .any(|category| self.error_count(category) > 0)
    }
}
