/// Atomic key-value backend
///
/// Relies on the store's native "set if absent, with TTL" primitive, so the
/// collision check and the expiration land in one round trip. Expired keys
/// are evicted by the store itself; there is no soft-expired state.

use crate::backend::{ClaimOutcome, StorageBackend};
use crate::record::{
    now_millis, validate_claim_expiration, validate_reassign_expiration, UrlRecord,
    MILLIS_PER_DAY,
};
use crate::token::validate_token;
use crate::{Error, Result};
use std::time::Duration;
use tracing::trace;

/// Key prefix for stored URL records
pub const KEY_PREFIX: &str = "url#";

/// Primitives an atomic key-value engine must offer.
///
/// Every method is a single atomic operation on the store.
pub trait AtomicKv: Send + Sync {
    /// Store `value` with `ttl` only if `key` is absent. Returns true if stored.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Current value of a key that has not expired.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite value and TTL only if `key` currently holds exactly
    /// `expected`. Returns true if stored.
    fn replace_if(&self, key: &str, expected: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key`. Returns true if it was present.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Delete `key` only if it currently holds exactly `expected`.
    fn delete_if(&self, key: &str, expected: &str) -> Result<bool>;

    /// Drop expired keys the engine has not evicted yet.
    fn evict_expired(&self) -> Result<u64> {
        Ok(0)
    }

    /// Engine name
    fn kind(&self) -> &'static str;
}

/// [`StorageBackend`] over any [`AtomicKv`] engine
pub struct AtomicKvBackend<S> {
    store: S,
    token_length: usize,
}

impl<S: AtomicKv> AtomicKvBackend<S> {
    pub fn new(store: S, token_length: usize) -> Self {
        Self { store, token_length }
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    fn key(token: &str) -> String {
        format!("{}{}", KEY_PREFIX, token)
    }

    /// Raw stored value and its decoded record
    fn load(&self, key: &str) -> Result<Option<(String, UrlRecord)>> {
        match self.store.get(key)? {
            Some(raw) => {
                let record = serde_json::from_str(&raw)?;
                Ok(Some((raw, record)))
            }
            None => Ok(None),
        }
    }
}

impl<S: AtomicKv> StorageBackend for AtomicKvBackend<S> {
    fn claim(&self, token: &str, long_url: &str, expiration_days: i64) -> Result<ClaimOutcome> {
        validate_token(token, self.token_length)?;
        validate_claim_expiration(expiration_days)?;

        let record = UrlRecord::new(long_url, expiration_days);
        let value = serde_json::to_string(&record)?;
        let ttl = Duration::from_millis((expiration_days * MILLIS_PER_DAY) as u64);

        if self.store.set_if_absent(&Self::key(token), &value, ttl)? {
            trace!(token, store = self.store.kind(), "Stored new record");
            Ok(ClaimOutcome::Created)
        } else {
            Ok(ClaimOutcome::Collision)
        }
    }

    fn read(&self, token: &str) -> Result<String> {
        validate_token(token, self.token_length)?;
        match self.load(&Self::key(token))? {
            // The store evicts on TTL; the liveness check covers TTL granularity
            Some((_, record)) if record.is_live(now_millis()) => Ok(record.long_url),
            _ => Err(Error::NotFound(token.to_string())),
        }
    }

    fn reassign(&self, token: &str, expiration_days: i64) -> Result<()> {
        validate_token(token, self.token_length)?;
        validate_reassign_expiration(expiration_days)?;

        let key = Self::key(token);
        let (raw, mut record) = self
            .load(&key)?
            .ok_or_else(|| Error::NotFound(token.to_string()))?;
        record.expiration_days = expiration_days;

        // Both writes are conditional on the value just read, so a record
        // removed and re-claimed by another caller in between is left alone.
        let written = match record.remaining_ms(now_millis()) {
            Some(remaining) => {
                let value = serde_json::to_string(&record)?;
                self.store
                    .replace_if(&key, &raw, &value, Duration::from_millis(remaining))?
            }
            // The new window has already elapsed: the store's equivalent
            // of expiry is eviction.
            None => self.store.delete_if(&key, &raw)?,
        };

        if !written {
            trace!(token, "Record changed during reassign");
            return Err(Error::NotFound(token.to_string()));
        }
        Ok(())
    }

    fn remove(&self, token: &str) -> Result<()> {
        validate_token(token, self.token_length)?;
        self.store.delete(&Self::key(token))?;
        Ok(())
    }

    fn purge_expired(&self) -> Result<u64> {
        self.store.evict_expired()
    }

    fn kind(&self) -> &'static str {
        self.store.kind()
    }

    fn token_length(&self) -> usize {
        self.token_length
    }
}
