//! SQLite-backed token storage.
//!
//! Collisions are detected by the primary key on `urls.token`. Expired rows
//! stay in the table (soft expiry) until a claim reclaims them, a purge
//! deletes them, or the token is removed.

use crate::backend::{ClaimOutcome, StorageBackend};
use crate::record::{
    now_millis, validate_claim_expiration, validate_reassign_expiration, UrlRecord,
};
use crate::token::validate_token;
use crate::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{ffi, params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS urls (
    token           TEXT    NOT NULL PRIMARY KEY,
    long_url        TEXT    NOT NULL,
    created_at      INTEGER NOT NULL,
    expiration_days INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_urls_expires_at
    ON urls (created_at + expiration_days * 86400000);
";

const FILE_PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
";

const INSERT_SQL: &str =
    "INSERT INTO urls (token, long_url, created_at, expiration_days) VALUES (?1, ?2, ?3, ?4)";

// Only rows whose window has elapsed may be overwritten.
const RECLAIM_SQL: &str = "
UPDATE urls SET long_url = ?2, created_at = ?3, expiration_days = ?4
 WHERE token = ?1 AND created_at + expiration_days * 86400000 <= ?3";

const READ_LIVE_SQL: &str = "
SELECT long_url FROM urls
 WHERE token = ?1 AND created_at + expiration_days * 86400000 > ?2";

const REASSIGN_SQL: &str = "UPDATE urls SET expiration_days = ?2 WHERE token = ?1";

const DELETE_SQL: &str = "DELETE FROM urls WHERE token = ?1";

const PURGE_SQL: &str = "DELETE FROM urls WHERE created_at + expiration_days * 86400000 <= ?1";

/// Fixed set of connections handed out round-robin.
///
/// A caller that finds its slot busy tries the others before blocking, so a
/// single slow transaction does not stall every request.
struct ConnectionPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ConnectionPool {
    fn new(conns: Vec<Connection>) -> Self {
        Self {
            conns: conns.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
        }
    }

    fn get(&self) -> MutexGuard<'_, Connection> {
        let n = self.conns.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for i in 0..n {
            if let Some(conn) = self.conns[(start + i) % n].try_lock() {
                return conn;
            }
        }
        self.conns[start % n].lock()
    }

    fn size(&self) -> usize {
        self.conns.len()
    }
}

/// Relational backend over SQLite
pub struct SqliteBackend {
    pool: ConnectionPool,
    token_length: usize,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Open or create a database file with `pool_size` connections.
    ///
    /// Write transactions start `IMMEDIATE`, so concurrent claimants queue on
    /// SQLite's write lock for up to `busy_timeout` instead of deadlocking on
    /// a lock upgrade.
    pub fn open(
        path: impl AsRef<Path>,
        pool_size: usize,
        busy_timeout: Duration,
        token_length: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        if pool_size == 0 {
            return Err(Error::InvalidConfig(
                "sqlite pool_size must be greater than 0".to_string(),
            ));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut conns = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(busy_timeout)?;
            if i == 0 {
                conn.execute_batch(FILE_PRAGMAS)?;
                conn.execute_batch(SCHEMA_SQL)?;
            }
            conns.push(conn);
        }

        debug!(path = ?path, pool_size, "Opened SQLite backend");

        Ok(Self {
            pool: ConnectionPool::new(conns),
            token_length,
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory database. Uses one connection, since each in-memory
    /// connection would otherwise see its own empty database.
    pub fn in_memory(token_length: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            pool: ConnectionPool::new(vec![conn]),
            token_length,
            path: None,
        })
    }

    /// Database file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Fetch the stored row regardless of liveness.
    pub fn get_record(&self, token: &str) -> Result<Option<UrlRecord>> {
        validate_token(token, self.token_length)?;
        let conn = self.pool.get();
        let record = conn
            .query_row(
                "SELECT long_url, created_at, expiration_days FROM urls WHERE token = ?1",
                params![token],
                |row| {
                    Ok(UrlRecord {
                        long_url: row.get(0)?,
                        created_at: row.get(1)?,
                        expiration_days: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Number of stored rows, live or soft-expired.
    pub fn row_count(&self) -> Result<u64> {
        let conn = self.pool.get();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM urls", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// True for the uniqueness violation a colliding INSERT produces.
fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}

impl StorageBackend for SqliteBackend {
    fn claim(&self, token: &str, long_url: &str, expiration_days: i64) -> Result<ClaimOutcome> {
        validate_token(token, self.token_length)?;
        validate_claim_expiration(expiration_days)?;

        let now = now_millis();
        let mut conn = self.pool.get();

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match tx.execute(INSERT_SQL, params![token, long_url, now, expiration_days]) {
            Ok(_) => {
                tx.commit()?;
                trace!(token, "Inserted new record");
                return Ok(ClaimOutcome::Created);
            }
            Err(e) if is_duplicate_key(&e) => tx.rollback()?,
            Err(e) => return Err(e.into()),
        }

        // Fresh transaction for the reclaim branch; "claimed" means this
        // UPDATE touched exactly one row.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let updated = tx.execute(RECLAIM_SQL, params![token, long_url, now, expiration_days])?;
        if updated == 1 {
            tx.commit()?;
            trace!(token, "Reclaimed expired record");
            Ok(ClaimOutcome::Reclaimed)
        } else {
            tx.rollback()?;
            Ok(ClaimOutcome::Collision)
        }
    }

    fn read(&self, token: &str) -> Result<String> {
        validate_token(token, self.token_length)?;
        let conn = self.pool.get();
        conn.query_row(READ_LIVE_SQL, params![token, now_millis()], |row| row.get(0))
            .optional()?
            .ok_or_else(|| Error::NotFound(token.to_string()))
    }

    fn reassign(&self, token: &str, expiration_days: i64) -> Result<()> {
        validate_token(token, self.token_length)?;
        validate_reassign_expiration(expiration_days)?;
        let conn = self.pool.get();
        let updated = conn.execute(REASSIGN_SQL, params![token, expiration_days])?;
        if updated == 0 {
            return Err(Error::NotFound(token.to_string()));
        }
        Ok(())
    }

    fn remove(&self, token: &str) -> Result<()> {
        validate_token(token, self.token_length)?;
        let conn = self.pool.get();
        conn.execute(DELETE_SQL, params![token])?;
        Ok(())
    }

    fn purge_expired(&self) -> Result<u64> {
        let conn = self.pool.get();
        let deleted = conn.execute(PURGE_SQL, params![now_millis()])?;
        Ok(deleted as u64)
    }

    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn token_length(&self) -> usize {
        self.token_length
    }
}
