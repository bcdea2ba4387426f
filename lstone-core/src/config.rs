use crate::token::{DEFAULT_TOKEN_LENGTH, MAX_TOKEN_LENGTH};
use crate::record::MAX_EXPIRATION_DAYS;
use std::path::PathBuf;
use std::time::Duration;

/// Default SQLite connection pool size for file-backed databases
pub const DEFAULT_SQLITE_POOL_SIZE: usize = 4;

/// Default time a SQLite connection waits on a locked database
pub const DEFAULT_SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Which storage engine backs the token keyspace
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackendConfig {
    /// Volatile in-process atomic KV store
    #[default]
    Memory,
    /// SQLite database that lives only as long as the process
    SqliteInMemory,
    /// File-backed SQLite database
    Sqlite {
        path: PathBuf,
        pool_size: usize,
        busy_timeout: Duration,
    },
    /// Redis server, e.g. `redis://127.0.0.1:6379/0`
    Redis { url: String },
}

impl BackendConfig {
    /// File-backed SQLite with default pool settings
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        BackendConfig::Sqlite {
            path: path.into(),
            pool_size: DEFAULT_SQLITE_POOL_SIZE,
            busy_timeout: DEFAULT_SQLITE_BUSY_TIMEOUT,
        }
    }

    pub fn redis(url: impl Into<String>) -> Self {
        BackendConfig::Redis { url: url.into() }
    }

    /// Short name used in logs and the health endpoint
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Memory => "memory",
            BackendConfig::SqliteInMemory => "sqlite-memory",
            BackendConfig::Sqlite { .. } => "sqlite",
            BackendConfig::Redis { .. } => "redis",
        }
    }
}

/// How candidate tokens are produced
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TokenMode {
    /// Secure random tokens
    #[default]
    Random,
    /// Cycle through a fixed list; test harnesses only
    Fixed(Vec<String>),
}

/// Shortener configuration, built once at startup and passed to constructors
#[derive(Debug, Clone)]
pub struct ShortenerConfig {
    /// Characters per token
    pub token_length: usize,

    /// Wall-clock allowance for one allocation
    pub budget: Duration,

    /// Lease applied when a request does not name one
    pub default_expiration_days: i64,

    /// Storage engine selection and connection parameters
    pub backend: BackendConfig,

    /// Token source
    pub token_mode: TokenMode,
}

impl Default for ShortenerConfig {
    fn default() -> Self {
        Self {
            token_length: DEFAULT_TOKEN_LENGTH,
            budget: Duration::from_millis(500),
            default_expiration_days: 30,
            backend: BackendConfig::default(),
            token_mode: TokenMode::Random,
        }
    }
}

impl ShortenerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token_length(mut self, length: usize) -> Self {
        self.token_length = length;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_default_expiration_days(mut self, days: i64) -> Self {
        self.default_expiration_days = days;
        self
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// Switch to the deterministic generator. Tokens must match `token_length`.
    pub fn with_fixed_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.token_mode = TokenMode::Fixed(tokens.into_iter().map(Into::into).collect());
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.token_length == 0 || self.token_length > MAX_TOKEN_LENGTH {
            return Err(format!(
                "token_length must be between 1 and {}",
                MAX_TOKEN_LENGTH
            ));
        }

        if self.budget.is_zero() {
            return Err("budget must be greater than 0".to_string());
        }

        if !(1..=MAX_EXPIRATION_DAYS).contains(&self.default_expiration_days) {
            return Err(format!(
                "default_expiration_days must be between 1 and {}",
                MAX_EXPIRATION_DAYS
            ));
        }

        match &self.backend {
            BackendConfig::Sqlite { pool_size, .. } if *pool_size == 0 => {
                return Err("sqlite pool_size must be greater than 0".to_string());
            }
            BackendConfig::Redis { url } if url.is_empty() => {
                return Err("redis url must not be empty".to_string());
            }
            _ => {}
        }

        if let TokenMode::Fixed(tokens) = &self.token_mode {
            if tokens.is_empty() {
                return Err("fixed token mode needs at least one token".to_string());
            }
            if let Some(bad) = tokens.iter().find(|t| t.chars().count() != self.token_length) {
                return Err(format!(
                    "fixed token '{}' does not match token_length {}",
                    bad, self.token_length
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShortenerConfig::default();
        assert_eq!(config.token_length, 6);
        assert_eq!(config.budget, Duration::from_millis(500));
        assert_eq!(config.backend, BackendConfig::Memory);
        assert_eq!(config.token_mode, TokenMode::Random);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = ShortenerConfig::new()
            .with_token_length(8)
            .with_budget(Duration::from_millis(50))
            .with_default_expiration_days(7)
            .with_backend(BackendConfig::sqlite("/tmp/urls.db"));

        assert_eq!(config.token_length, 8);
        assert_eq!(config.budget, Duration::from_millis(50));
        assert_eq!(config.default_expiration_days, 7);
        assert_eq!(config.backend.kind(), "sqlite");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let config = ShortenerConfig::new().with_budget(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_token_length() {
        assert!(ShortenerConfig::new().with_token_length(0).validate().is_err());
        assert!(ShortenerConfig::new().with_token_length(65).validate().is_err());
    }

    #[test]
    fn test_validate_fixed_tokens_must_match_length() {
        let ok = ShortenerConfig::new().with_fixed_tokens(["abcdef"]);
        assert!(ok.validate().is_ok());

        let bad = ShortenerConfig::new().with_fixed_tokens(["abc"]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_validate_zero_pool() {
        let config = ShortenerConfig::new().with_backend(BackendConfig::Sqlite {
            path: "/tmp/x.db".into(),
            pool_size: 0,
            busy_timeout: DEFAULT_SQLITE_BUSY_TIMEOUT,
        });
        assert!(config.validate().is_err());
    }
}
