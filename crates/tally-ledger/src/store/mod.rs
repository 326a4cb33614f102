//! Student and transaction persistence.
//!
//! # Purpose
//! Abstracts the datastore behind [`LedgerStore`] so the ledger logic runs
//! unchanged against the in-memory and Postgres backends.
//!
//! # Key invariants
//! - [`LedgerStore::apply_points`] inserts the transaction row and updates the
//!   student balance atomically; on any failure neither is visible.
//! - The balance update only applies to enabled students. Zero affected rows
//!   is reported as [`StoreError::Conflict`].
use crate::model::{
    NegativeBalancePolicy, NewStudent, PointTransaction, PointsAction, Student, StudentId,
};
use crate::search::SearchPattern;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod postgres;
#[cfg(test)]
mod postgres_tests;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which balance the atomic write is based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceBasis {
    /// Balances computed by the caller from an earlier read, written as-is.
    Snapshot { before: i64, after: i64 },
    /// Re-read the balance inside the atomic scope and settle it there.
    Locked { policy: NegativeBalancePolicy },
}

/// One balance mutation handed to [`LedgerStore::apply_points`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsWrite {
    pub student_id: StudentId,
    pub action: PointsAction,
    pub amount: i64,
    pub reason: String,
    pub basis: BalanceBasis,
}

impl PointsWrite {
    /// Resolve the `(before, after)` pair given the balance read inside the
    /// atomic scope.
    pub fn settle(&self, current: i64) -> (i64, i64) {
        match self.basis {
            BalanceBasis::Snapshot { before, after } => (before, after),
            BalanceBasis::Locked { policy } => {
                (current, self.action.settle(current, self.amount, policy))
            }
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch a student regardless of its `enabled` flag.
    async fn get_student(&self, student_id: StudentId) -> StoreResult<Student>;
    async fn create_student(&self, student: NewStudent) -> StoreResult<Student>;
    async fn disable_student(&self, student_id: StudentId) -> StoreResult<Student>;
    /// Enabled students ordered by id.
    async fn list_students(&self) -> StoreResult<Vec<Student>>;
    async fn count_enabled_students(&self) -> StoreResult<u64>;

    async fn apply_points(&self, write: PointsWrite) -> StoreResult<PointTransaction>;

    /// Transactions for one student, most recent first, optionally limited to
    /// those created at or after `since`.
    async fn list_transactions(
        &self,
        student_id: StudentId,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<PointTransaction>>;
    /// Every transaction, most recent first.
    async fn list_all_transactions(&self) -> StoreResult<Vec<PointTransaction>>;

    /// Enabled students matching `pattern`, ordered by id.
    async fn search_students(
        &self,
        pattern: &SearchPattern,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Vec<Student>>;
    async fn count_matching_students(&self, pattern: &SearchPattern) -> StoreResult<u64>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
