use crate::backend::AtomicKv;
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    deadline: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline > now
    }
}

/// Volatile in-process atomic KV store with per-key TTL.
///
/// Each primitive runs under one mutex, which gives the same single-node
/// atomicity a Redis server provides. Expired entries are evicted lazily on
/// access and in bulk by [`AtomicKv::evict_expired`].
#[derive(Default)]
pub struct InMemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deadline(ttl: Duration) -> Instant {
        let now = Instant::now();
        now.checked_add(ttl).unwrap_or(now + Duration::from_secs(u32::MAX as u64))
    }
}

impl AtomicKv for InMemoryKv {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: Self::deadline(ttl),
            },
        );
        Ok(true)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn replace_if(&self, key: &str, expected: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == expected => {
                entry.value = value.to_string();
                entry.deadline = Self::deadline(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    fn delete_if(&self, key: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) && entry.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn evict_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok((before - entries.len()) as u64)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
