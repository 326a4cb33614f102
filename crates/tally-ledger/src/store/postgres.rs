//! Postgres-backed implementation of the ledger store.
//!
//! # Data model
//! - `students` holds the authoritative running balance per student.
//! - `points` is the append-only audit trail. Each row carries a `seq` assigned
//!   by Postgres at insert time. For one student the insert happens while the
//!   row lock is held, so `seq` follows commit order and history is ordered by
//!   `seq` alone. `created_at` comes from `clock_timestamp()`, not the
//!   transaction start time.
//!
//! # Consistency / atomicity
//! [`LedgerStore::apply_points`] runs the audit insert and the balance update
//! in one transaction. The update is conditioned on `enabled = TRUE`; if it
//! touches zero rows the transaction is dropped without commit, which rolls
//! back the audit row as well.
//!
//! With [`BalanceBasis::Locked`] the current balance is read with
//! `SELECT ... FOR UPDATE` inside that transaction, so concurrent mutations of
//! one student queue behind each other and chain their snapshots.
//!
//! # Operational notes
//! - Migrations run on connect via `sqlx::migrate!("./migrations")`.
//! - Database URLs may contain credentials; they are never logged here.
use super::{BalanceBasis, LedgerStore, PointsWrite, StoreError, StoreResult};
use crate::config::PostgresConfig;
use crate::model::{NewStudent, PointTransaction, PointsAction, Student, StudentId};
use crate::search::SearchPattern;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Durable ledger store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use tally_ledger::config::PostgresConfig;
/// use tally_ledger::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct DbStudent {
    student_id: i64,
    first_name: String,
    last_name: String,
    points: i64,
    enabled: bool,
    created_at: DateTime<Utc>,
}

/// Row shape for the `points` audit table.
#[derive(Debug, Clone, FromRow)]
struct DbPoint {
    point_id: Uuid,
    student_id: i64,
    points_modified: i64,
    points_action: String,
    total_points_before: i64,
    total_points_after: i64,
    reason: String,
    created_at: DateTime<Utc>,
}

const STUDENT_COLUMNS: &str = "student_id, first_name, last_name, points, enabled, created_at";
const POINT_COLUMNS: &str = "point_id, student_id, points_modified, points_action, \
     total_points_before, total_points_after, reason, created_at";
const SEARCH_PREDICATE: &str = "enabled = TRUE AND (LOWER(first_name) LIKE $1 ESCAPE '\\' \
     OR LOWER(last_name) LIKE $1 ESCAPE '\\' \
     OR CAST(student_id AS TEXT) LIKE $1 ESCAPE '\\')";

impl PostgresStore {
    /// Connect, size the pool from `pg` and apply pending migrations.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options)
            .await?;

        // Fail startup rather than serving against a partial schema.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool whose schema is already migrated.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn get_student(&self, student_id: StudentId) -> StoreResult<Student> {
        let row = sqlx::query_as::<_, DbStudent>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = $1"
        ))
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(student_from_db)
            .ok_or_else(|| StoreError::NotFound(format!("student {student_id}")))
    }

    async fn create_student(&self, student: NewStudent) -> StoreResult<Student> {
        let result = sqlx::query_as::<_, DbStudent>(&format!(
            "INSERT INTO students (student_id, first_name, last_name) VALUES ($1, $2, $3) \
             RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(student.student_id)
        .bind(&student.first_name)
        .bind(&student.last_name)
        .fetch_one(&self.pool)
        .await;
        match result {
            Ok(row) => Ok(student_from_db(row)),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict(format!(
                "student {} exists",
                student.student_id
            ))),
            Err(err) => Err(StoreError::Unexpected(err.into())),
        }
    }

    async fn disable_student(&self, student_id: StudentId) -> StoreResult<Student> {
        let row = sqlx::query_as::<_, DbStudent>(&format!(
            "UPDATE students SET enabled = FALSE WHERE student_id = $1 RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(student_from_db)
            .ok_or_else(|| StoreError::NotFound(format!("student {student_id}")))
    }

    async fn list_students(&self) -> StoreResult<Vec<Student>> {
        let rows = sqlx::query_as::<_, DbStudent>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE enabled = TRUE ORDER BY student_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(student_from_db).collect())
    }

    async fn count_enabled_students(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students WHERE enabled = TRUE")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn apply_points(&self, write: PointsWrite) -> StoreResult<PointTransaction> {
        let mut tx = self.pool.begin().await?;

        let current = match write.basis {
            BalanceBasis::Locked { .. } => {
                let current: Option<i64> = sqlx::query_scalar(
                    "SELECT points FROM students WHERE student_id = $1 AND enabled = TRUE \
                     FOR UPDATE",
                )
                .bind(write.student_id)
                .fetch_optional(&mut *tx)
                .await?;
                match current {
                    Some(points) => points,
                    None => return Err(cannot_update(write.student_id)),
                }
            }
            // Snapshot writes never consult the stored balance.
            BalanceBasis::Snapshot { before, .. } => before,
        };
        let (balance_before, balance_after) = write.settle(current);

        let row = sqlx::query_as::<_, DbPoint>(&format!(
            "INSERT INTO points (point_id, student_id, points_modified, points_action, \
             total_points_before, total_points_after, reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {POINT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(write.student_id)
        .bind(write.amount)
        .bind(write.action.as_str())
        .bind(balance_before)
        .bind(balance_after)
        .bind(&write.reason)
        .fetch_one(&mut *tx)
        .await?;

        let updated =
            sqlx::query("UPDATE students SET points = $1 WHERE student_id = $2 AND enabled = TRUE")
                .bind(balance_after)
                .bind(write.student_id)
                .execute(&mut *tx)
                .await?;
        if updated.rows_affected() == 0 {
            // Dropping `tx` rolls back the audit row.
            return Err(cannot_update(write.student_id));
        }

        tx.commit().await?;
        point_from_db(row)
    }

    async fn list_transactions(
        &self,
        student_id: StudentId,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<PointTransaction>> {
        let rows = sqlx::query_as::<_, DbPoint>(&format!(
            "SELECT {POINT_COLUMNS} FROM points \
             WHERE student_id = $1 AND ($2::timestamptz IS NULL OR created_at >= $2) \
             ORDER BY seq DESC"
        ))
        .bind(student_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(point_from_db).collect()
    }

    async fn list_all_transactions(&self) -> StoreResult<Vec<PointTransaction>> {
        let rows = sqlx::query_as::<_, DbPoint>(&format!(
            "SELECT {POINT_COLUMNS} FROM points ORDER BY seq DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(point_from_db).collect()
    }

    async fn search_students(
        &self,
        pattern: &SearchPattern,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Vec<Student>> {
        let rows = sqlx::query_as::<_, DbStudent>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE {SEARCH_PREDICATE} \
             ORDER BY student_id LIMIT $2 OFFSET $3"
        ))
        .bind(escape_underscores(pattern.as_str()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(student_from_db).collect())
    }

    async fn count_matching_students(&self, pattern: &SearchPattern) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM students WHERE {SEARCH_PREDICATE}"
        ))
        .bind(escape_underscores(pattern.as_str()))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn cannot_update(student_id: StudentId) -> StoreError {
    StoreError::Conflict(format!("cannot update points for student {student_id}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

/// `_` and `\` are literal in search patterns; only `%` is a wildcard.
fn escape_underscores(pattern: &str) -> String {
    pattern.replace('\\', "\\\\").replace('_', "\\_")
}

fn student_from_db(row: DbStudent) -> Student {
    Student {
        student_id: row.student_id,
        first_name: row.first_name,
        last_name: row.last_name,
        points: row.points,
        enabled: row.enabled,
        created_at: row.created_at,
    }
}

fn point_from_db(row: DbPoint) -> StoreResult<PointTransaction> {
    let action = PointsAction::from_str(&row.points_action)
        .map_err(|_| anyhow!("unknown points action '{}'", row.points_action))?;
    Ok(PointTransaction {
        transaction_id: row.point_id,
        student_id: row.student_id,
        delta: row.points_modified,
        action,
        balance_before: row.total_points_before,
        balance_after: row.total_points_after,
        reason: row.reason,
        created_at: row.created_at,
    })
}
