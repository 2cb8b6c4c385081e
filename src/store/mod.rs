//! Embedded SQLite persistence for scraped metrics
//!
//! One database file per application under [`manager::STORES_DIR`], one set
//! of tables per pod. Writes go through the ingestion queue ([`writer`]);
//! reads go through [`query`].

pub mod control;
pub mod manager;
pub mod query;
pub mod statements;
pub mod writer;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use control::ControlStore;
pub use manager::{MetricsStore, PersistOutcome, StoreManager};
pub use query::{DetailValue, MetricDetail, QueryService};
pub use statements::StatementSet;
pub use writer::{IngestQueue, IngestWriter, PersistRequest};

/// Number of distinct collection times kept per pod
pub const RETENTION_SNAPSHOTS: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cannot prepare data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ingestion queue is closed")]
    QueueClosed,
    #[error("pod {pod} maps to tables {prefix} already used by pod {other}")]
    TableCollision {
        pod: String,
        other: String,
        prefix: String,
    },
}

/// Replace every non-alphanumeric character with `_`
///
/// Used for both store file names and per-pod table prefixes.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Open (creating if needed) a SQLite file with the engine's pragmas
pub(crate) async fn open_pool(path: &Path) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30))
        .foreign_keys(true)
        .pragma("cache_size", "-32000")
        .pragma("temp_store", "memory");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    Ok(pool)
}
