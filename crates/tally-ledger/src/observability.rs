//! Logging and metrics wiring for processes embedding the ledger.
//!
//! # Purpose
//! Installs a `tracing` subscriber and a Prometheus metrics recorder, and
//! names the metrics the ledger emits.
//!
//! # Notes
//! Initialization is guarded by `OnceLock` so repeated calls (tests, multiple
//! embedders) are harmless.
use crate::model::PointsAction;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static OBS_INIT: OnceLock<()> = OnceLock::new();

pub const MUTATIONS_TOTAL: &str = "tally_ledger_mutations_total";
pub const POINTS_MOVED_TOTAL: &str = "tally_ledger_points_moved_total";
pub const STUDENTS_ENABLED: &str = "tally_ledger_students_enabled";

/// Install the global subscriber and metrics recorder.
///
/// The returned handle renders the Prometheus exposition text; serving it is
/// up to the embedding HTTP layer.
pub fn init_observability(service_name: &str) -> PrometheusHandle {
    OBS_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer();
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();
        tracing::info!(service = service_name, "observability initialized");
    });

    install_metrics_recorder()
}

fn install_metrics_recorder() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            // Another recorder may already be installed by the embedder.
            let _ = metrics::set_global_recorder(recorder);
            handle
        })
        .clone()
}

/// Outcome label for [`MUTATIONS_TOTAL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Committed,
    NotFound,
    Conflict,
}

impl MutationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationOutcome::Committed => "committed",
            MutationOutcome::NotFound => "not_found",
            MutationOutcome::Conflict => "conflict",
        }
    }
}

pub fn record_mutation(action: PointsAction, outcome: MutationOutcome) {
    metrics::counter!(
        MUTATIONS_TOTAL,
        "action" => action.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_points_moved(action: PointsAction, amount: i64) {
    metrics::counter!(POINTS_MOVED_TOTAL, "action" => action.as_str())
        .increment(amount.unsigned_abs());
}

pub fn set_students_enabled(count: u64) {
    metrics::gauge!(STUDENTS_ENABLED).set(count as f64);
}
