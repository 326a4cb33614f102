//! Points ledger operations.
//!
//! # Purpose
//! [`PointsLedger`] is the entry point the HTTP layer calls: it reads the
//! student, settles the new balance under the configured
//! [`NegativeBalancePolicy`], and hands a [`PointsWrite`] to the store, which
//! performs the audit insert and balance update atomically.
//!
//! # Key invariants
//! - Every operation returns a [`StatusResult`]; store errors are converted
//!   into [`LedgerFailure`] values and never escape.
//! - A mutation against a missing or disabled student performs no writes.
//!
//! # Isolation
//! The pre-read that detects missing students happens outside the store's
//! atomic scope. Under [`LedgerIsolation::Serializable`] the store re-reads the
//! balance inside that scope, so concurrent mutations chain. Under
//! [`LedgerIsolation::Snapshot`] the pre-read balance is written as-is and two
//! concurrent mutations can commit against the same `balance_before`.
//!
//! A [`MutationGate`] runs between the pre-read and the write. Production code
//! uses [`NoopGate`]; tests install a gate to force interleavings.
use crate::config::{LedgerConfig, LedgerIsolation, StorageBackend};
use crate::model::{
    NegativeBalancePolicy, NewStudent, PaginatedResult, Pagination, PointTransaction,
    PointsAction, Student, StudentId,
};
use crate::observability::{self, MutationOutcome};
use crate::search::SearchPattern;
use crate::status::{LedgerFailure, StatusResult};
use crate::store::memory::InMemoryStore;
use crate::store::postgres::PostgresStore;
use crate::store::{BalanceBasis, LedgerStore, PointsWrite, StoreError};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Hook invoked after a mutation has read the student and before it writes.
#[async_trait]
pub trait MutationGate: Send + Sync {
    async fn after_read(&self, student: &Student, action: PointsAction);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGate;

#[async_trait]
impl MutationGate for NoopGate {
    async fn after_read(&self, _student: &Student, _action: PointsAction) {}
}

/// Ledger behavior knobs derived from [`LedgerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    pub negative_balance: NegativeBalancePolicy,
    pub isolation: LedgerIsolation,
    pub pagination_limit: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self::from(&LedgerConfig::default())
    }
}

impl From<&LedgerConfig> for LedgerSettings {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            negative_balance: config.negative_balance,
            isolation: config.isolation,
            pagination_limit: config.pagination_limit.max(1),
        }
    }
}

/// Open the store selected by `config.storage`.
pub async fn connect_store(config: &LedgerConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(
                PostgresStore::connect(pg)
                    .await
                    .context("connect postgres ledger store")?,
            )
        }
    };
    tracing::info!(
        backend = store.backend_name(),
        durable = store.is_durable(),
        "ledger store ready"
    );
    Ok(store)
}

#[derive(Clone)]
pub struct PointsLedger {
    store: Arc<dyn LedgerStore>,
    settings: LedgerSettings,
    gate: Arc<dyn MutationGate>,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn LedgerStore>, settings: LedgerSettings) -> Self {
        Self {
            store,
            settings,
            gate: Arc::new(NoopGate),
        }
    }

    /// Connect the configured store and build a ledger over it.
    pub async fn from_config(config: &LedgerConfig) -> anyhow::Result<Self> {
        let store = connect_store(config).await?;
        Ok(Self::new(store, LedgerSettings::from(config)))
    }

    pub fn with_gate(mut self, gate: Arc<dyn MutationGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn settings(&self) -> LedgerSettings {
        self.settings
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Current record of an enabled student.
    pub async fn get_balance(&self, student_id: StudentId) -> StatusResult<Student> {
        match self.store.get_student(student_id).await {
            Ok(student) if student.enabled => Ok(student),
            Ok(_) | Err(StoreError::NotFound(_)) => Err(student_not_found(student_id)),
            Err(err) => Err(unexpected(err)),
        }
    }

    pub async fn add_points(
        &self,
        student_id: StudentId,
        amount: i64,
        reason: &str,
    ) -> StatusResult<PointTransaction> {
        self.mutate(student_id, PointsAction::Added, amount, reason)
            .await
    }

    /// Remove points; a negative result is clamped to zero unless negative
    /// balances are allowed.
    pub async fn remove_points(
        &self,
        student_id: StudentId,
        amount: i64,
        reason: &str,
    ) -> StatusResult<PointTransaction> {
        self.mutate(student_id, PointsAction::Removed, amount, reason)
            .await
    }

    async fn mutate(
        &self,
        student_id: StudentId,
        action: PointsAction,
        amount: i64,
        reason: &str,
    ) -> StatusResult<PointTransaction> {
        let student = match self.get_balance(student_id).await {
            Ok(student) => student,
            Err(failure) => {
                let outcome = match failure {
                    LedgerFailure::NotFound(_) => MutationOutcome::NotFound,
                    LedgerFailure::WriteConflict(_) => MutationOutcome::Conflict,
                };
                observability::record_mutation(action, outcome);
                tracing::debug!(student_id, action = %action, "points mutation rejected");
                return Err(failure);
            }
        };

        self.gate.after_read(&student, action).await;

        let policy = self.settings.negative_balance;
        let basis = match self.settings.isolation {
            LedgerIsolation::Serializable => BalanceBasis::Locked { policy },
            LedgerIsolation::Snapshot => BalanceBasis::Snapshot {
                before: student.points,
                after: action.settle(student.points, amount, policy),
            },
        };
        let write = PointsWrite {
            student_id,
            action,
            amount,
            reason: reason.to_string(),
            basis,
        };

        match self.store.apply_points(write).await {
            Ok(transaction) => {
                observability::record_mutation(action, MutationOutcome::Committed);
                observability::record_points_moved(
                    action,
                    transaction.balance_after.saturating_sub(transaction.balance_before),
                );
                tracing::info!(
                    student_id,
                    action = %action,
                    delta = amount,
                    balance_before = transaction.balance_before,
                    balance_after = transaction.balance_after,
                    "points mutation committed"
                );
                Ok(transaction)
            }
            Err(err) => {
                observability::record_mutation(action, MutationOutcome::Conflict);
                tracing::warn!(student_id, action = %action, error = %err, "points mutation failed");
                let message = match action {
                    PointsAction::Added => format!("Cannot insert points to {student_id}!"),
                    PointsAction::Removed => format!("Cannot remove points from {student_id}!"),
                };
                Err(LedgerFailure::WriteConflict(message))
            }
        }
    }

    /// All transactions for a student, most recent first.
    pub async fn list_transactions(
        &self,
        student_id: StudentId,
    ) -> StatusResult<Vec<PointTransaction>> {
        let transactions = self
            .store
            .list_transactions(student_id, None)
            .await
            .map_err(unexpected)?;
        non_empty(
            transactions,
            format!("Student {student_id} not found, or no points found."),
        )
    }

    /// Transactions for a student created at or after `since`.
    pub async fn list_transactions_since(
        &self,
        student_id: StudentId,
        since: DateTime<Utc>,
    ) -> StatusResult<Vec<PointTransaction>> {
        let transactions = self
            .store
            .list_transactions(student_id, Some(since))
            .await
            .map_err(unexpected)?;
        non_empty(
            transactions,
            format!("Student {student_id} not found, or points not found."),
        )
    }

    pub async fn list_all_transactions(&self) -> StatusResult<Vec<PointTransaction>> {
        let transactions = self
            .store
            .list_all_transactions()
            .await
            .map_err(unexpected)?;
        non_empty(transactions, "no points found".to_string())
    }

    /// Page through enabled students whose name or id contains `query`.
    ///
    /// `page` is 1-based; the reported page is clamped to the last page and
    /// the totals come from an unpaged match count.
    pub async fn search(
        &self,
        query: &str,
        page: u64,
    ) -> StatusResult<PaginatedResult<Student>> {
        let pattern = SearchPattern::from_query(query);
        let limit = self.settings.pagination_limit;
        let count = self
            .store
            .count_matching_students(&pattern)
            .await
            .map_err(unexpected)?;
        let items = self
            .store
            .search_students(&pattern, limit, Pagination::offset(page, limit))
            .await
            .map_err(unexpected)?;
        tracing::debug!(pattern = pattern.as_str(), page, count, "student search");
        Ok(PaginatedResult {
            items,
            pagination: Pagination::new(page, limit, count),
        })
    }

    pub async fn add_student(&self, student: NewStudent) -> StatusResult<Student> {
        let student_id = student.student_id;
        match self.store.create_student(student).await {
            Ok(created) => {
                tracing::info!(student_id, "student added");
                self.refresh_enabled_gauge().await;
                Ok(created)
            }
            Err(err) => {
                tracing::warn!(student_id, error = %err, "student insert failed");
                Err(LedgerFailure::WriteConflict(format!(
                    "Cannot add student {student_id}!"
                )))
            }
        }
    }

    /// Soft-delete a student; its transaction history is kept.
    pub async fn disable_student(&self, student_id: StudentId) -> StatusResult<Student> {
        match self.store.disable_student(student_id).await {
            Ok(student) => {
                tracing::info!(student_id, "student disabled");
                self.refresh_enabled_gauge().await;
                Ok(student)
            }
            Err(StoreError::NotFound(_)) => Err(student_not_found(student_id)),
            Err(err) => Err(unexpected(err)),
        }
    }

    /// Enabled students ordered by id.
    pub async fn list_students(&self) -> StatusResult<Vec<Student>> {
        let students = self.store.list_students().await.map_err(unexpected)?;
        non_empty(students, "no students found".to_string())
    }

    async fn refresh_enabled_gauge(&self) {
        match self.store.count_enabled_students().await {
            Ok(count) => observability::set_students_enabled(count),
            Err(err) => tracing::warn!(error = %err, "failed to count enabled students"),
        }
    }
}

fn student_not_found(student_id: StudentId) -> LedgerFailure {
    LedgerFailure::NotFound(format!("Student {student_id} not found."))
}

fn unexpected(err: StoreError) -> LedgerFailure {
    tracing::warn!(error = %err, "ledger store error");
    LedgerFailure::WriteConflict(err.to_string())
}

fn non_empty<T>(items: Vec<T>, message: String) -> StatusResult<Vec<T>> {
    if items.is_empty() {
        Err(LedgerFailure::NotFound(message))
    } else {
        Ok(items)
    }
}
