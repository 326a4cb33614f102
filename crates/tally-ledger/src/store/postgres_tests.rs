//! Postgres store tests against a real database.
//!
//! Run with `TALLY_TEST_DATABASE_URL=postgres://... cargo test -p tally-ledger --features pg-tests`.
//! Each run creates its own schema; tests are serialized and truncate the
//! tables before they start.
#![cfg(feature = "pg-tests")]

use super::postgres::PostgresStore;
use super::{BalanceBasis, LedgerStore, PointsWrite, StoreError};
use crate::config::LedgerIsolation;
use crate::ledger::{LedgerSettings, MutationGate, PointsLedger};
use crate::model::{NegativeBalancePolicy, NewStudent, PointTransaction, PointsAction, Student};
use crate::search::SearchPattern;
use serial_test::serial;
use sqlx::Connection;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

static PG_SCHEMA: tokio::sync::OnceCell<String> = tokio::sync::OnceCell::const_new();
static MIGRATOR: Migrator = sqlx::migrate!();

fn pg_url() -> Option<String> {
    match std::env::var("TALLY_TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("skipping pg-tests: TALLY_TEST_DATABASE_URL not set");
            None
        }
    }
}

fn url_with_schema(base_url: &str, schema: &str) -> String {
    let encoded = format!("-csearch_path%3D{schema}");
    if base_url.contains('?') {
        format!("{base_url}&options={encoded}")
    } else {
        format!("{base_url}?options={encoded}")
    }
}

async fn prepared_store(base_url: &str) -> anyhow::Result<PostgresStore> {
    let schema = PG_SCHEMA
        .get_or_try_init(|| async {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            let schema = format!("tally_test_{}_{}", std::process::id(), nanos);
            let mut conn = sqlx::PgConnection::connect(base_url).await?;
            sqlx::query(&format!(r#"CREATE SCHEMA IF NOT EXISTS "{schema}""#))
                .execute(&mut conn)
                .await?;
            let mut scoped =
                sqlx::PgConnection::connect(&url_with_schema(base_url, &schema)).await?;
            MIGRATOR.run(&mut scoped).await?;
            Ok::<_, anyhow::Error>(schema)
        })
        .await?;

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&url_with_schema(base_url, schema))
        .await?;
    sqlx::query("TRUNCATE points, students RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await?;
    Ok(PostgresStore::from_pool(pool))
}

fn student(student_id: i64, first: &str, last: &str) -> NewStudent {
    NewStudent {
        student_id,
        first_name: first.into(),
        last_name: last.into(),
    }
}

fn locked(student_id: i64, action: PointsAction, amount: i64) -> PointsWrite {
    PointsWrite {
        student_id,
        action,
        amount,
        reason: "pg".into(),
        basis: BalanceBasis::Locked {
            policy: NegativeBalancePolicy::Floor,
        },
    }
}

#[tokio::test]
#[serial]
async fn postgres_store_ledger_roundtrip() -> anyhow::Result<()> {
    let Some(url) = pg_url() else {
        return Ok(());
    };
    let store = prepared_store(&url).await?;
    store.health_check().await?;
    assert!(store.is_durable());

    store.create_student(student(1, "Ada", "Lovelace")).await?;
    let err = store
        .create_student(student(1, "Ada", "Again"))
        .await
        .expect_err("duplicate");
    assert!(matches!(err, StoreError::Conflict(_)));

    let added = store.apply_points(locked(1, PointsAction::Added, 30)).await?;
    assert_eq!((added.balance_before, added.balance_after), (0, 30));
    let removed = store
        .apply_points(locked(1, PointsAction::Removed, 50))
        .await?;
    assert_eq!((removed.balance_before, removed.balance_after), (30, 0));
    assert_eq!(removed.delta, 50);
    assert_eq!(store.get_student(1).await?.points, 0);

    let history = store.list_transactions(1, None).await?;
    assert_eq!(
        history.iter().map(|tx| tx.transaction_id).collect::<Vec<_>>(),
        vec![removed.transaction_id, added.transaction_id]
    );
    let since = store
        .list_transactions(1, Some(removed.created_at))
        .await?;
    assert_eq!(since[0].transaction_id, removed.transaction_id);
    Ok(())
}

#[tokio::test]
#[serial]
async fn postgres_store_rejects_disabled_student_without_audit_row() -> anyhow::Result<()> {
    let Some(url) = pg_url() else {
        return Ok(());
    };
    let store = prepared_store(&url).await?;
    store.create_student(student(7, "Grace", "Hopper")).await?;
    store.disable_student(7).await?;

    for basis in [
        BalanceBasis::Locked {
            policy: NegativeBalancePolicy::Floor,
        },
        BalanceBasis::Snapshot {
            before: 0,
            after: 5,
        },
    ] {
        let mut write = locked(7, PointsAction::Added, 5);
        write.basis = basis;
        let err = store.apply_points(write).await.expect_err("disabled");
        assert!(matches!(err, StoreError::Conflict(_)));
    }
    assert!(store.list_all_transactions().await?.is_empty());
    assert!(store.list_students().await?.is_empty());
    Ok(())
}

#[tokio::test]
#[serial]
async fn postgres_store_search_is_case_insensitive_and_paged() -> anyhow::Result<()> {
    let Some(url) = pg_url() else {
        return Ok(());
    };
    let store = prepared_store(&url).await?;
    store.create_student(student(1, "Ada", "Lovelace")).await?;
    store.create_student(student(2, "Grace", "Hopper")).await?;
    store.create_student(student(3, "Adam", "Smith")).await?;

    let pattern = SearchPattern::from_query("ADA");
    assert_eq!(store.count_matching_students(&pattern).await?, 2);
    let second = store.search_students(&pattern, 1, 1).await?;
    assert_eq!(second[0].student_id, 3);

    let by_id = SearchPattern::from_query("2");
    assert_eq!(store.search_students(&by_id, 10, 0).await?[0].student_id, 2);

    let separated = SearchPattern::from_query("love-lace");
    assert_eq!(store.count_matching_students(&separated).await?, 1);
    Ok(())
}

/// Holds every mutation after its read until both mutations have read.
struct BarrierGate(tokio::sync::Barrier);

#[async_trait::async_trait]
impl MutationGate for BarrierGate {
    async fn after_read(&self, _student: &Student, _action: PointsAction) {
        self.0.wait().await;
    }
}

const START: i64 = 100;

async fn store_with_balance(url: &str) -> anyhow::Result<PostgresStore> {
    let store = prepared_store(url).await?;
    store.create_student(student(1, "Ada", "Lovelace")).await?;
    store.apply_points(locked(1, PointsAction::Added, START)).await?;
    Ok(store)
}

fn gated_ledger(store: PostgresStore, isolation: LedgerIsolation) -> PointsLedger {
    PointsLedger::new(
        Arc::new(store),
        LedgerSettings {
            negative_balance: NegativeBalancePolicy::Floor,
            isolation,
            pagination_limit: 25,
        },
    )
    .with_gate(Arc::new(BarrierGate(tokio::sync::Barrier::new(2))))
}

fn assert_history_chains(history: &[PointTransaction], stored: i64) {
    assert_eq!(history[0].balance_after, stored, "newest row matches balance");
    for pair in history.windows(2) {
        assert_eq!(
            pair[0].balance_before, pair[1].balance_after,
            "row {} does not start where {} ended",
            pair[0].transaction_id, pair[1].transaction_id
        );
    }
}

#[tokio::test]
#[serial]
async fn postgres_serializable_mutations_chain_balances() -> anyhow::Result<()> {
    let Some(url) = pg_url() else {
        return Ok(());
    };
    let store = store_with_balance(&url).await?;
    let ledger = gated_ledger(store.clone(), LedgerIsolation::Serializable);

    let (a, b) = tokio::join!(ledger.add_points(1, 5, "a"), ledger.add_points(1, 7, "b"));
    a.expect("a");
    b.expect("b");

    let stored = store.get_student(1).await?.points;
    assert_eq!(stored, START + 12);
    let history = store.list_transactions(1, None).await?;
    assert_eq!(history.len(), 3);
    assert_history_chains(&history, stored);
    Ok(())
}

#[tokio::test]
#[serial]
async fn postgres_snapshot_mutations_lose_an_update() -> anyhow::Result<()> {
    let Some(url) = pg_url() else {
        return Ok(());
    };
    let store = store_with_balance(&url).await?;
    let ledger = gated_ledger(store.clone(), LedgerIsolation::Snapshot);

    let (a, b) = tokio::join!(ledger.add_points(1, 5, "a"), ledger.add_points(1, 7, "b"));
    a.expect("a");
    b.expect("b");

    let history = store.list_transactions(1, None).await?;
    assert_eq!(history.len(), 3);
    assert!(history[..2].iter().all(|tx| tx.balance_before == START));
    let stored = store.get_student(1).await?.points;
    assert_eq!(stored, history[0].balance_after);
    assert_ne!(stored, START + 12);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn postgres_concurrent_locked_writes_keep_history_in_chain_order() -> anyhow::Result<()> {
    let Some(url) = pg_url() else {
        return Ok(());
    };
    let store = store_with_balance(&url).await?;

    let mut tasks = tokio::task::JoinSet::new();
    let mut expected = START;
    for i in 0..64 {
        let amount = 1 + (i % 3);
        expected += amount;
        let store = store.clone();
        tasks.spawn(async move {
            store
                .apply_points(locked(1, PointsAction::Added, amount))
                .await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined??;
    }

    let stored = store.get_student(1).await?.points;
    assert_eq!(stored, expected);
    let history = store.list_transactions(1, None).await?;
    assert_eq!(history.len(), 65);
    assert_history_chains(&history, stored);

    let all = store.list_all_transactions().await?;
    assert_history_chains(&all, stored);
    Ok(())
}
