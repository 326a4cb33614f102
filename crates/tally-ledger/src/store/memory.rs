//! In-memory implementation of the ledger store.
//!
//! # Purpose
//! Implements [`LedgerStore`] with maps guarded by `tokio::sync::RwLock`, for
//! tests, local development, and single-process deployments that accept
//! losing state on restart.
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - Mutations that touch both students and transactions take the student
//!   lock first, then the transaction lock, and commit both before releasing
//!   either. That ordering is what makes the insert+update pair atomic here.
use super::{LedgerStore, PointsWrite, StoreError, StoreResult};
use crate::model::{NewStudent, PointTransaction, Student, StudentId};
use crate::search::SearchPattern;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory ledger store.
///
/// Students are kept in a `BTreeMap` so listings come out ordered by id.
/// Transactions are appended to a `Vec` in commit order; reading it backwards
/// yields most-recent-first even when timestamps tie.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    students: Arc<RwLock<BTreeMap<StudentId, Student>>>,
    transactions: Arc<RwLock<Vec<PointTransaction>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a student with an explicit starting balance.
    pub async fn insert_student(&self, student: Student) -> StoreResult<Student> {
        let mut students = self.students.write().await;
        if students.contains_key(&student.student_id) {
            return Err(StoreError::Conflict(format!(
                "student {} exists",
                student.student_id
            )));
        }
        students.insert(student.student_id, student.clone());
        Ok(student)
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn get_student(&self, student_id: StudentId) -> StoreResult<Student> {
        self.students
            .read()
            .await
            .get(&student_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("student {student_id}")))
    }

    async fn create_student(&self, student: NewStudent) -> StoreResult<Student> {
        self.insert_student(Student {
            student_id: student.student_id,
            first_name: student.first_name,
            last_name: student.last_name,
            points: 0,
            enabled: true,
            created_at: Utc::now(),
        })
        .await
    }

    async fn disable_student(&self, student_id: StudentId) -> StoreResult<Student> {
        let mut students = self.students.write().await;
        let student = students
            .get_mut(&student_id)
            .ok_or_else(|| StoreError::NotFound(format!("student {student_id}")))?;
        student.enabled = false;
        Ok(student.clone())
    }

    async fn list_students(&self) -> StoreResult<Vec<Student>> {
        Ok(self
            .students
            .read()
            .await
            .values()
            .filter(|student| student.enabled)
            .cloned()
            .collect())
    }

    async fn count_enabled_students(&self) -> StoreResult<u64> {
        Ok(self
            .students
            .read()
            .await
            .values()
            .filter(|student| student.enabled)
            .count() as u64)
    }

    async fn apply_points(&self, write: PointsWrite) -> StoreResult<PointTransaction> {
        let mut students = self.students.write().await;
        let mut transactions = self.transactions.write().await;

        // The update is conditioned on the student still being enabled; a
        // miss here is the zero-rows case and nothing has been written yet.
        let student = students
            .get_mut(&write.student_id)
            .filter(|student| student.enabled)
            .ok_or_else(|| {
                StoreError::Conflict(format!(
                    "cannot update points for student {}",
                    write.student_id
                ))
            })?;

        let (balance_before, balance_after) = write.settle(student.points);
        let transaction = PointTransaction {
            transaction_id: Uuid::new_v4(),
            student_id: write.student_id,
            delta: write.amount,
            action: write.action,
            balance_before,
            balance_after,
            reason: write.reason,
            created_at: Utc::now(),
        };
        transactions.push(transaction.clone());
        student.points = balance_after;
        Ok(transaction)
    }

    async fn list_transactions(
        &self,
        student_id: StudentId,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<PointTransaction>> {
        Ok(self
            .transactions
            .read()
            .await
            .iter()
            .rev()
            .filter(|tx| tx.student_id == student_id)
            .filter(|tx| since.is_none_or(|since| tx.created_at >= since))
            .cloned()
            .collect())
    }

    async fn list_all_transactions(&self) -> StoreResult<Vec<PointTransaction>> {
        Ok(self.transactions.read().await.iter().rev().cloned().collect())
    }

    async fn search_students(
        &self,
        pattern: &SearchPattern,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Vec<Student>> {
        Ok(self
            .students
            .read()
            .await
            .values()
            .filter(|student| student.enabled && pattern.matches(student))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_matching_students(&self, pattern: &SearchPattern) -> StoreResult<u64> {
        Ok(self
            .students
            .read()
            .await
            .values()
            .filter(|student| student.enabled && pattern.matches(student))
            .count() as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
