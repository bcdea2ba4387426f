/// Command line and environment configuration for the server
///
/// Every flag can also be supplied through an `LSTONE_*` environment
/// variable. [`Args::to_config`] turns the parsed values into the core
/// [`ShortenerConfig`].

use clap::{Parser, ValueEnum};
use lstone_core::config::{DEFAULT_SQLITE_BUSY_TIMEOUT, DEFAULT_SQLITE_POOL_SIZE};
use lstone_core::{BackendConfig, ShortenerConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Storage engine selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Volatile in-process KV store
    Memory,
    /// SQLite database held in memory
    SqliteMemory,
    /// File-backed SQLite database
    Sqlite,
    /// Redis server
    Redis,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "lstone-server")]
#[command(about = "LinkStone URL shortener server", long_about = None)]
pub struct Args {
    /// Host to bind to
    #[arg(long, env = "LSTONE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "LSTONE_PORT", default_value = "3000")]
    pub port: u16,

    /// Base URL used to build short links (defaults to http://HOST:PORT)
    #[arg(long, env = "LSTONE_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Storage backend
    #[arg(long, env = "LSTONE_BACKEND", value_enum, default_value = "memory")]
    pub backend: BackendKind,

    /// Path to the SQLite database file (required for --backend sqlite)
    #[arg(long, env = "LSTONE_SQLITE_PATH", value_name = "PATH")]
    pub sqlite_path: Option<PathBuf>,

    /// SQLite connection pool size
    #[arg(long, env = "LSTONE_SQLITE_POOL_SIZE", default_value_t = DEFAULT_SQLITE_POOL_SIZE)]
    pub sqlite_pool_size: usize,

    /// Milliseconds a SQLite connection waits on a locked database
    #[arg(
        long,
        env = "LSTONE_SQLITE_BUSY_TIMEOUT_MS",
        default_value_t = DEFAULT_SQLITE_BUSY_TIMEOUT.as_millis() as u64
    )]
    pub sqlite_busy_timeout_ms: u64,

    /// Redis connection URL (required for --backend redis)
    #[arg(long, env = "LSTONE_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Characters per token
    #[arg(long, env = "LSTONE_TOKEN_LENGTH", default_value = "6")]
    pub token_length: usize,

    /// Allocation budget in milliseconds
    #[arg(long, env = "LSTONE_BUDGET_MS", default_value = "500")]
    pub budget_ms: u64,

    /// Lease applied when a request names no expiration
    #[arg(long, env = "LSTONE_DEFAULT_EXPIRATION_DAYS", default_value = "30")]
    pub default_expiration_days: i64,

    /// Seconds between expired-record purges (0 = disabled)
    #[arg(long, env = "LSTONE_SWEEP_INTERVAL_SECS", default_value = "300")]
    pub sweep_interval_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "LSTONE_LOG_JSON")]
    pub log_json: bool,
}

impl Args {
    /// Build the core configuration, rejecting inconsistent flag combinations.
    pub fn to_config(&self) -> Result<ShortenerConfig, String> {
        let backend = match self.backend {
            BackendKind::Memory => BackendConfig::Memory,
            BackendKind::SqliteMemory => BackendConfig::SqliteInMemory,
            BackendKind::Sqlite => {
                let path = self
                    .sqlite_path
                    .clone()
                    .ok_or("--backend sqlite requires --sqlite-path")?;
                BackendConfig::Sqlite {
                    path,
                    pool_size: self.sqlite_pool_size,
                    busy_timeout: Duration::from_millis(self.sqlite_busy_timeout_ms),
                }
            }
            BackendKind::Redis => {
                let url = self
                    .redis_url
                    .clone()
                    .ok_or("--backend redis requires --redis-url")?;
                BackendConfig::Redis { url }
            }
        };

        let config = ShortenerConfig::new()
            .with_token_length(self.token_length)
            .with_budget(Duration::from_millis(self.budget_ms))
            .with_default_expiration_days(self.default_expiration_days)
            .with_backend(backend);
        config.validate()?;
        Ok(config)
    }

    /// Address the listener binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base for short links, without a trailing slash
    pub fn public_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind_addr()),
        }
    }

    /// Sweeper period, `None` when disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["lstone-server"]).unwrap();
        let config = args.to_config().unwrap();
        assert_eq!(config.backend, BackendConfig::Memory);
        assert_eq!(config.token_length, 6);
        assert_eq!(config.budget, Duration::from_millis(500));
        assert_eq!(config.default_expiration_days, 30);
        assert_eq!(args.public_url(), "http://127.0.0.1:3000");
        assert_eq!(args.sweep_interval(), Some(Duration::from_secs(300)));
        assert!(!args.log_json);
    }

    #[test]
    fn test_sqlite_requires_path() {
        let args = Args::try_parse_from(["lstone-server", "--backend", "sqlite"]).unwrap();
        assert!(args.to_config().unwrap_err().contains("--sqlite-path"));

        let args = Args::try_parse_from([
            "lstone-server",
            "--backend",
            "sqlite",
            "--sqlite-path",
            "/tmp/links.db",
            "--sqlite-pool-size",
            "2",
        ])
        .unwrap();
        match args.to_config().unwrap().backend {
            BackendConfig::Sqlite { path, pool_size, .. } => {
                assert_eq!(path, PathBuf::from("/tmp/links.db"));
                assert_eq!(pool_size, 2);
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_redis_requires_url() {
        let args = Args::try_parse_from(["lstone-server", "--backend", "redis"]).unwrap();
        assert!(args.to_config().is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let args = Args::try_parse_from(["lstone-server", "--token-length", "0"]).unwrap();
        assert!(args.to_config().is_err());

        let args = Args::try_parse_from(["lstone-server", "--budget-ms", "0"]).unwrap();
        assert!(args.to_config().is_err());
    }

    #[test]
    fn test_public_url_and_sweeper() {
        let args = Args::try_parse_from([
            "lstone-server",
            "--public-url",
            "https://lnk.example/",
            "--sweep-interval-secs",
            "0",
        ])
        .unwrap();
        assert_eq!(args.public_url(), "https://lnk.example");
        assert_eq!(args.sweep_interval(), None);
    }
}
