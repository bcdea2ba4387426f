use crate::backend::AtomicKv;
use crate::Result;
use parking_lot::Mutex;
use redis::{Client, Connection, RedisError, Script};
use std::time::Duration;
use tracing::{debug, warn};

/// Time allowed to establish a Redis connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis-backed [`AtomicKv`].
///
/// Claims map to `SET NX PX`. Conditional writes run as Lua scripts so the
/// value comparison and the write happen in one server-side step. A dropped
/// connection is discarded and re-established on the next call; the failed
/// call itself is reported, not retried.
pub struct RedisKv {
    client: Client,
    conn: Mutex<Option<Connection>>,
    replace_if_script: Script,
    delete_if_script: Script,
}

const REPLACE_IF_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
";

const DELETE_IF_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

impl RedisKv {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379/0`.
    pub fn open(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_connection_with_timeout(CONNECT_TIMEOUT)?;
        debug!(url, "Connected to Redis");
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
            replace_if_script: Script::new(REPLACE_IF_SCRIPT),
            delete_if_script: Script::new(DELETE_IF_SCRIPT),
        })
    }

    fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> std::result::Result<T, RedisError>,
    {
        let mut slot = self.conn.lock();
        if slot.is_none() {
            *slot = Some(self.client.get_connection_with_timeout(CONNECT_TIMEOUT)?);
        }
        let conn = slot
            .as_mut()
            .ok_or_else(|| crate::Error::Internal("redis connection missing".to_string()))?;

        match op(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    warn!(error = %e, "Dropping broken Redis connection");
                    *slot = None;
                }
                Err(e.into())
            }
        }
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        // PX rejects zero
        (ttl.as_millis() as u64).max(1)
    }
}

impl AtomicKv for RedisKv {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = self.run(|conn| {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(Self::ttl_millis(ttl))
                .query(conn)
        })?;
        Ok(reply.is_some())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.run(|conn| redis::cmd("GET").arg(key).query(conn))
    }

    fn replace_if(&self, key: &str, expected: &str, value: &str, ttl: Duration) -> Result<bool> {
        let stored: i64 = self.run(|conn| {
            self.replace_if_script
                .key(key)
                .arg(expected)
                .arg(value)
                .arg(Self::ttl_millis(ttl))
                .invoke(conn)
        })?;
        Ok(stored == 1)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let removed: i64 = self.run(|conn| redis::cmd("DEL").arg(key).query(conn))?;
        Ok(removed > 0)
    }

    fn delete_if(&self, key: &str, expected: &str) -> Result<bool> {
        let removed: i64 =
            self.run(|conn| self.delete_if_script.key(key).arg(expected).invoke(conn))?;
        Ok(removed > 0)
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
