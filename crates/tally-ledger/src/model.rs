//! Ledger domain model.
//!
//! # Purpose
//! Students, their running points balance, and the append-only point
//! transactions that explain every balance change.
//!
//! # Key invariants
//! - A student's `points` equals the `balance_after` of its most recent
//!   transaction (or its starting balance if it has none).
//! - Transactions are never updated or deleted once written.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type StudentId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: StudentId,
    pub first_name: String,
    pub last_name: String,
    pub points: i64,
    /// Soft-delete flag; disabled students are hidden from listings and
    /// cannot have their balance changed.
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudent {
    pub student_id: StudentId,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointsAction {
    Added,
    Removed,
}

impl PointsAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PointsAction::Added => "added",
            PointsAction::Removed => "removed",
        }
    }

    /// Compute the balance after applying `amount` to `before`.
    ///
    /// Only removals can go below zero; with [`NegativeBalancePolicy::Floor`]
    /// such a result is clamped to zero.
    pub fn settle(self, before: i64, amount: i64, policy: NegativeBalancePolicy) -> i64 {
        match self {
            PointsAction::Added => before.saturating_add(amount),
            PointsAction::Removed => {
                let after = before.saturating_sub(amount);
                match policy {
                    NegativeBalancePolicy::Floor if after < 0 => 0,
                    _ => after,
                }
            }
        }
    }
}

impl std::fmt::Display for PointsAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PointsAction {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "added" => Ok(PointsAction::Added),
            "removed" => Ok(PointsAction::Removed),
            _ => Err(()),
        }
    }
}

/// What happens when a removal would take a balance below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeBalancePolicy {
    /// Write the negative balance as-is.
    Allow,
    /// Clamp the balance to zero.
    #[default]
    Floor,
}

impl NegativeBalancePolicy {
    pub fn from_allow_negative(allow_negative: bool) -> Self {
        if allow_negative {
            NegativeBalancePolicy::Allow
        } else {
            NegativeBalancePolicy::Floor
        }
    }
}

/// One row of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointTransaction {
    pub transaction_id: Uuid,
    pub student_id: StudentId,
    /// Amount requested by the caller. When a removal is floored this stays
    /// the requested amount; the snapshots show what was actually applied.
    pub delta: i64,
    pub action: PointsAction,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Total number of matches across all pages.
    pub count: u64,
    /// Requested page clamped to the last page (0 when nothing matched).
    pub page: u64,
    /// Number of pages, `ceil(count / limit)`.
    pub total: u64,
    pub limit: u64,
}

impl Pagination {
    pub fn new(requested_page: u64, limit: u64, count: u64) -> Self {
        let limit = limit.max(1);
        let total = count.div_ceil(limit);
        Self {
            count,
            page: requested_page.min(total),
            total,
            limit,
        }
    }

    /// Row offset for a 1-based page; pages `0` and `1` both start at zero.
    pub fn offset(requested_page: u64, limit: u64) -> u64 {
        requested_page.saturating_sub(1).saturating_mul(limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}
