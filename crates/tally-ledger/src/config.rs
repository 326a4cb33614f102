use crate::model::NegativeBalancePolicy;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;

pub const DEFAULT_PAGINATION_LIMIT: u64 = 25;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Path of the shared YAML configuration file.
pub const CONFIG_PATH_ENV: &str = "TALLY_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

/// How a balance mutation relates to the balance it read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerIsolation {
    /// Re-read the balance inside the write transaction so concurrent
    /// mutations of one student chain instead of overwriting each other.
    #[default]
    Serializable,
    /// Write the balance computed from the earlier read. Two concurrent
    /// mutations can both commit against the same `balance_before`, and the
    /// later commit wins the stored balance.
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

// Ledger configuration sourced from environment variables and the YAML file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub negative_balance: NegativeBalancePolicy,
    pub pagination_limit: u64,
    pub isolation: LedgerIsolation,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            negative_balance: NegativeBalancePolicy::Floor,
            pagination_limit: DEFAULT_PAGINATION_LIMIT,
            isolation: LedgerIsolation::Serializable,
            storage: StorageBackend::Memory,
            postgres: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFileOverride {
    #[serde(default)]
    server: ServerOverride,
    #[serde(default)]
    database: DatabaseOverride,
}

#[derive(Debug, Default, Deserialize)]
struct ServerOverride {
    allow_negative_points: Option<bool>,
    pagination_limit: Option<u64>,
    isolation: Option<LedgerIsolation>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseOverride {
    backend: Option<StorageBackend>,
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self::read_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::read_env()?;
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read {CONFIG_PATH_ENV}: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn read_env() -> Result<Self> {
        let allow_negative = match std::env::var("TALLY_ALLOW_NEGATIVE_POINTS") {
            Ok(value) => value
                .parse::<bool>()
                .with_context(|| "parse TALLY_ALLOW_NEGATIVE_POINTS")?,
            Err(_) => false,
        };
        let pagination_limit = match std::env::var("TALLY_PAGINATION_LIMIT") {
            Ok(value) => value
                .parse::<u64>()
                .with_context(|| "parse TALLY_PAGINATION_LIMIT")?,
            Err(_) => DEFAULT_PAGINATION_LIMIT,
        };
        let isolation = match std::env::var("TALLY_LEDGER_ISOLATION") {
            Ok(value) => parse_isolation(&value).with_context(|| "parse TALLY_LEDGER_ISOLATION")?,
            Err(_) => LedgerIsolation::Serializable,
        };
        let storage = match std::env::var("TALLY_STORAGE") {
            Ok(value) => parse_backend(&value).with_context(|| "parse TALLY_STORAGE")?,
            Err(_) => StorageBackend::Memory,
        };
        let postgres = std::env::var("TALLY_DATABASE_URL")
            .ok()
            .map(|url| PostgresConfig {
                url,
                max_connections: DEFAULT_MAX_CONNECTIONS,
                acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            });

        Ok(Self {
            negative_balance: NegativeBalancePolicy::from_allow_negative(allow_negative),
            pagination_limit,
            isolation,
            storage,
            postgres,
        })
    }

    /// Overlay the `server` and `database` sections of a YAML document.
    pub fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        if contents.trim().is_empty() {
            return Ok(());
        }
        let file: ConfigFileOverride =
            serde_yaml::from_str(contents).with_context(|| "parse ledger config yaml")?;

        if let Some(value) = file.server.allow_negative_points {
            self.negative_balance = NegativeBalancePolicy::from_allow_negative(value);
        }
        if let Some(value) = file.server.pagination_limit {
            self.pagination_limit = value;
        }
        if let Some(value) = file.server.isolation {
            self.isolation = value;
        }
        if let Some(value) = file.database.backend {
            self.storage = value;
        }
        if let Some(url) = file.database.url {
            let pg = self.postgres.get_or_insert_with(|| PostgresConfig {
                url: String::new(),
                max_connections: DEFAULT_MAX_CONNECTIONS,
                acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            });
            pg.url = url;
        }
        if let Some(pg) = self.postgres.as_mut() {
            if let Some(value) = file.database.max_connections {
                pg.max_connections = value;
            }
            if let Some(value) = file.database.acquire_timeout_ms {
                pg.acquire_timeout_ms = value;
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.pagination_limit == 0 {
            bail!("pagination_limit must be at least 1");
        }
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("postgres configuration missing: set TALLY_DATABASE_URL or database.url");
        }
        Ok(())
    }
}

fn parse_isolation(value: &str) -> Result<LedgerIsolation> {
    match value.trim().to_ascii_lowercase().as_str() {
        "serializable" => Ok(LedgerIsolation::Serializable),
        "snapshot" => Ok(LedgerIsolation::Snapshot),
        other => bail!("unknown ledger isolation '{other}'"),
    }
}

fn parse_backend(value: &str) -> Result<StorageBackend> {
    match value.trim().to_ascii_lowercase().as_str() {
        "memory" => Ok(StorageBackend::Memory),
        "postgres" => Ok(StorageBackend::Postgres),
        other => bail!("unknown storage backend '{other}'"),
    }
}
