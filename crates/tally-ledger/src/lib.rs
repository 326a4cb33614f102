//! Student points ledger.
//!
//! # Purpose
//! Tracks a running points balance per student and an append-only audit
//! trail of every change, with a configurable negative-balance policy and
//! pluggable storage (in-memory or Postgres).
//!
//! # Notes
//! Ledger operations return [`StatusResult`] values; the HTTP layer embedding
//! this crate maps them onto page outcomes with [`status_body`].
//!
//! ```rust
//! use std::sync::Arc;
//! use tally_ledger::store::memory::InMemoryStore;
//! use tally_ledger::{LedgerSettings, NewStudent, PointsLedger};
//!
//! # async fn demo() {
//! let ledger = PointsLedger::new(Arc::new(InMemoryStore::new()), LedgerSettings::default());
//! ledger
//!     .add_student(NewStudent {
//!         student_id: 1,
//!         first_name: "Ada".into(),
//!         last_name: "Lovelace".into(),
//!     })
//!     .await
//!     .ok();
//! let tx = ledger.add_points(1, 30, "quiz").await.ok();
//! assert_eq!(tx.map(|tx| tx.balance_after), Some(30));
//! # }
//! ```
pub mod config;
pub mod ledger;
pub mod model;
pub mod observability;
pub mod search;
pub mod status;
pub mod store;

pub use config::{LedgerConfig, LedgerIsolation, PostgresConfig, StorageBackend};
pub use ledger::{LedgerSettings, MutationGate, NoopGate, PointsLedger, connect_store};
pub use model::{
    NegativeBalancePolicy, NewStudent, PaginatedResult, Pagination, PointTransaction,
    PointsAction, Student, StudentId,
};
pub use status::{LedgerFailure, StatusResult, status_body};
pub use store::{LedgerStore, StoreError, StoreResult};
