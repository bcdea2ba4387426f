/// Storage backends for the token keyspace
///
/// Every backend honours the same contract: a claim succeeds iff no
/// currently-live record occupies the token, whatever the engine's native
/// expiry model looks like.

use crate::config::{BackendConfig, ShortenerConfig};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::info;

pub mod kv;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_kv;
pub mod sqlite;

pub use kv::{AtomicKv, AtomicKvBackend};
pub use memory::InMemoryKv;
#[cfg(feature = "redis")]
pub use redis_kv::RedisKv;
pub use sqlite::SqliteBackend;

/// Result of a single claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// No record occupied the token; a fresh one was written
    Created,
    /// An expired record occupied the token and was overwritten
    Reclaimed,
    /// A live record holds the token
    Collision,
}

impl ClaimOutcome {
    /// True when the caller now owns the token
    pub fn is_claimed(self) -> bool {
        !matches!(self, ClaimOutcome::Collision)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClaimOutcome::Created => "created",
            ClaimOutcome::Reclaimed => "reclaimed",
            ClaimOutcome::Collision => "collision",
        }
    }
}

/// Capability contract shared by every storage engine.
///
/// Implementations validate token shape before touching storage and provide
/// their own concurrency control; callers never lock around these calls.
pub trait StorageBackend: Send + Sync {
    /// Take exclusive ownership of `token` for a new record.
    ///
    /// Overwrites an expired record as if it were new. A live record yields
    /// [`ClaimOutcome::Collision`], which is not an error.
    fn claim(&self, token: &str, long_url: &str, expiration_days: i64) -> Result<ClaimOutcome>;

    /// Return the URL of a live record, or `NotFound`.
    fn read(&self, token: &str) -> Result<String>;

    /// Replace the expiration window of an existing record, live or not.
    ///
    /// A non-positive value force-expires the record. Fails with `NotFound`
    /// when no record exists.
    fn reassign(&self, token: &str, expiration_days: i64) -> Result<()>;

    /// Delete the record. Removing an absent token is not an error.
    fn remove(&self, token: &str) -> Result<()>;

    /// Physically drop records whose window has elapsed. Returns the count.
    fn purge_expired(&self) -> Result<u64>;

    /// Short engine name for logs and health reporting
    fn kind(&self) -> &'static str;

    /// Token length enforced by this backend
    fn token_length(&self) -> usize;
}

/// Resolve the configured backend into a concrete implementation.
///
/// Called once at startup; request handling only sees the trait object.
pub fn open_backend(config: &ShortenerConfig) -> Result<Arc<dyn StorageBackend>> {
    config.validate().map_err(Error::InvalidConfig)?;
    let length = config.token_length;

    let backend: Arc<dyn StorageBackend> = match &config.backend {
        BackendConfig::Memory => Arc::new(AtomicKvBackend::new(InMemoryKv::new(), length)),
        BackendConfig::SqliteInMemory => Arc::new(SqliteBackend::in_memory(length)?),
        BackendConfig::Sqlite {
            path,
            pool_size,
            busy_timeout,
        } => {
            let backend = SqliteBackend::open(path, *pool_size, *busy_timeout, length).map_err(|e| {
                e.with_context(&format!("failed to open sqlite database {}", path.display()))
            })?;
            Arc::new(backend)
        }
        #[cfg(feature = "redis")]
        BackendConfig::Redis { url } => {
            let store = RedisKv::open(url)
                .map_err(|e| e.with_context(&format!("failed to connect to redis at {}", url)))?;
            Arc::new(AtomicKvBackend::new(store, length))
        }
        #[cfg(not(feature = "redis"))]
        BackendConfig::Redis { .. } => {
            return Err(Error::InvalidConfig(
                "redis backend requires the `redis` feature".to_string(),
            ))
        }
    };

    info!(
        backend = backend.kind(),
        token_length = length,
        "Storage backend opened"
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_outcome_flags() {
        assert!(ClaimOutcome::Created.is_claimed());
        assert!(ClaimOutcome::Reclaimed.is_claimed());
        assert!(!ClaimOutcome::Collision.is_claimed());
    }

    #[test]
    fn test_open_memory_backend() {
        let backend = open_backend(&ShortenerConfig::default()).unwrap();
        assert_eq!(backend.kind(), "memory");
        assert_eq!(backend.token_length(), 6);
    }

    #[test]
    fn test_open_sqlite_memory_backend() {
        let config = ShortenerConfig::new()
            .with_token_length(8)
            .with_backend(BackendConfig::SqliteInMemory);
        let backend = open_backend(&config).unwrap();
        assert_eq!(backend.kind(), "sqlite");
        assert_eq!(backend.token_length(), 8);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let config = ShortenerConfig::new().with_token_length(0);
        assert!(matches!(open_backend(&config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_open_failure_names_the_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let config = ShortenerConfig::new().with_backend(BackendConfig::Sqlite {
            path: blocker.join("links.db"),
            pool_size: 1,
            busy_timeout: crate::config::DEFAULT_SQLITE_BUSY_TIMEOUT,
        });
        let err = match open_backend(&config) {
            Ok(_) => panic!("opened a database under a regular file"),
            Err(e) => e,
        };
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(err.is_infrastructure());
        assert!(err.to_string().contains("failed to open sqlite database"));
        assert!(err.to_string().contains("blocker"));
    }
}
