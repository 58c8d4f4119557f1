pub mod cached;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

#[cfg(test)]
mod sqlite_tests;

pub use cached::CachedStorage;
pub use ledger::{LedgerError, LedgerResult};
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{AdminStore, CandidateRow, CatalogStore, EventStore, Ledger, Storage};

use crate::config::{DatabaseBackend, DatabaseConfig};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Open and initialize the configured backend, wrapped in the candidate cache
/// unless `candidate_cache_ttl` is zero.
pub async fn connect(config: &DatabaseConfig, candidate_cache_ttl: Duration) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.backend {
        DatabaseBackend::Sqlite => {
            tracing::info!("Using SQLite storage at {}", config.url);
            Arc::new(SqliteStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            tracing::info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Memory => {
            tracing::warn!("Using in-memory storage; nothing will survive a restart");
            Arc::new(MemoryStorage::new())
        }
    };

    storage.init().await?;

    if candidate_cache_ttl.is_zero() {
        return Ok(storage);
    }

    tracing::info!(
        "Candidate cache enabled (ttl: {}ms)",
        candidate_cache_ttl.as_millis()
    );
    Ok(Arc::new(CachedStorage::new(storage, candidate_cache_ttl)))
}
