/// Test utilities and helpers for LinkStone testing
///
/// Provides one constructor per storage engine so contract tests can run the
/// same assertions everywhere, plus backends with scripted failures.

use anyhow::Context;
use lstone_core::backend::{AtomicKvBackend, InMemoryKv, SqliteBackend};
use lstone_core::config::DEFAULT_SQLITE_BUSY_TIMEOUT;
use lstone_core::{
    ClaimOutcome, Error, FixedTokenGenerator, RandomTokenGenerator, Result, StorageBackend,
    TokenGenerator,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Token length used by every helper
pub const TEST_TOKEN_LENGTH: usize = 6;

/// Environment variable naming a Redis server for the Redis-backed tests
pub const REDIS_URL_ENV: &str = "LSTONE_TEST_REDIS_URL";

/// Storage backend wrapper that manages temporary file lifecycle
pub struct TestBackend {
    pub backend: Arc<dyn StorageBackend>,
    /// Human-readable label for assertion messages
    pub label: &'static str,
    path: Option<PathBuf>,
    _temp_dir: Option<TempDir>,
}

impl TestBackend {
    /// In-process atomic KV store
    pub fn memory() -> Self {
        Self {
            backend: Arc::new(AtomicKvBackend::new(InMemoryKv::new(), TEST_TOKEN_LENGTH)),
            label: "memory",
            path: None,
            _temp_dir: None,
        }
    }

    /// Single-connection in-memory SQLite database
    pub fn sqlite_memory() -> Self {
        let db = SqliteBackend::in_memory(TEST_TOKEN_LENGTH).expect("Failed to open SQLite");
        Self {
            backend: Arc::new(db),
            label: "sqlite-memory",
            path: None,
            _temp_dir: None,
        }
    }

    /// File-backed SQLite database with a connection pool, in a temp dir
    pub fn sqlite_file() -> Self {
        Self::sqlite_file_with_pool(4)
    }

    pub fn sqlite_file_with_pool(pool_size: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("links.db");
        let db = SqliteBackend::open(&path, pool_size, DEFAULT_SQLITE_BUSY_TIMEOUT, TEST_TOKEN_LENGTH)
            .expect("Failed to open SQLite file");

        Self {
            backend: Arc::new(db),
            label: "sqlite-file",
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Redis backend, when `LSTONE_TEST_REDIS_URL` is set
    pub fn redis() -> Option<Self> {
        let url = std::env::var(REDIS_URL_ENV).ok()?;
        Some(Self::open_redis(&url).expect("Failed to connect to Redis"))
    }

    fn open_redis(url: &str) -> anyhow::Result<Self> {
        let kv = lstone_core::backend::RedisKv::open(url)
            .with_context(|| format!("connecting to {}", url))?;
        Ok(Self {
            backend: Arc::new(AtomicKvBackend::new(kv, TEST_TOKEN_LENGTH)),
            label: "redis",
            path: None,
            _temp_dir: None,
        })
    }

    /// Every backend available in this environment
    pub fn all() -> Vec<Self> {
        let mut backends = vec![Self::memory(), Self::sqlite_memory(), Self::sqlite_file()];
        backends.extend(Self::redis());
        backends
    }

    /// True for engines that keep soft-expired records around
    pub fn is_relational(&self) -> bool {
        self.label.starts_with("sqlite")
    }

    /// Database file path, for file-backed SQLite
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Random token of the test length.
///
/// Shared stores such as Redis outlive a test run, so tests that need a
/// known-empty slot draw a fresh token instead of hard-coding one.
pub fn unique_token() -> String {
    RandomTokenGenerator::new(TEST_TOKEN_LENGTH)
        .and_then(|g| g.generate())
        .expect("Failed to generate token")
        .into_string()
}

/// Generator that cycles through `tokens`
pub fn fixed_generator(tokens: &[&str]) -> Arc<dyn TokenGenerator> {
    Arc::new(FixedTokenGenerator::new(tokens).expect("Invalid fixed tokens"))
}

/// Backend on which every claim collides with a live record
#[derive(Default)]
pub struct CollidingBackend {
    claims: AtomicU64,
}

impl CollidingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim calls received so far
    pub fn claims(&self) -> u64 {
        self.claims.load(Ordering::SeqCst)
    }
}

impl StorageBackend for CollidingBackend {
    fn claim(&self, _token: &str, _long_url: &str, _expiration_days: i64) -> Result<ClaimOutcome> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(ClaimOutcome::Collision)
    }

    fn read(&self, token: &str) -> Result<String> {
        Err(Error::NotFound(token.to_string()))
    }

    fn reassign(&self, token: &str, _expiration_days: i64) -> Result<()> {
        Err(Error::NotFound(token.to_string()))
    }

    fn remove(&self, _token: &str) -> Result<()> {
        Ok(())
    }

    fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }

    fn kind(&self) -> &'static str {
        "colliding"
    }

    fn token_length(&self) -> usize {
        TEST_TOKEN_LENGTH
    }
}

/// Wraps a backend and fails the first `failures` claims with an
/// infrastructure error
pub struct FlakyBackend {
    inner: Arc<dyn StorageBackend>,
    remaining_failures: AtomicU64,
    claims: AtomicU64,
}

impl FlakyBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, failures: u64) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU64::new(failures),
            claims: AtomicU64::new(0),
        }
    }

    /// Claim calls received so far, failed ones included
    pub fn claims(&self) -> u64 {
        self.claims.load(Ordering::SeqCst)
    }
}

impl StorageBackend for FlakyBackend {
    fn claim(&self, token: &str, long_url: &str, expiration_days: i64) -> Result<ClaimOutcome> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Internal("injected connection failure".to_string()));
        }
        self.inner.claim(token, long_url, expiration_days)
    }

    fn read(&self, token: &str) -> Result<String> {
        self.inner.read(token)
    }

    fn reassign(&self, token: &str, expiration_days: i64) -> Result<()> {
        self.inner.reassign(token, expiration_days)
    }

    fn remove(&self, token: &str) -> Result<()> {
        self.inner.remove(token)
    }

    fn purge_expired(&self) -> Result<u64> {
        self.inner.purge_expired()
    }

    fn kind(&self) -> &'static str {
        "flaky"
    }

    fn token_length(&self) -> usize {
        self.inner.token_length()
    }
}
