use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds in one expiration day.
pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// Longest lease a record may be given, in days.
pub const MAX_EXPIRATION_DAYS: i64 = 36_500;

/// The value stored against a live token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub long_url: String,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
    pub expiration_days: i64,
}

impl UrlRecord {
    /// Create a record stamped with the current time.
    pub fn new(long_url: impl Into<String>, expiration_days: i64) -> Self {
        Self {
            long_url: long_url.into(),
            created_at: now_millis(),
            expiration_days,
        }
    }

    /// Instant (unix ms) at which the record stops being live.
    pub fn expires_at(&self) -> i64 {
        self.created_at
            .saturating_add(self.expiration_days.saturating_mul(MILLIS_PER_DAY))
    }

    /// Live while `created_at + expiration_days > now`.
    pub fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at() > now_ms
    }

    /// Milliseconds of lease left, or `None` once expired.
    pub fn remaining_ms(&self, now_ms: i64) -> Option<u64> {
        let remaining = self.expires_at() - now_ms;
        if remaining > 0 {
            Some(remaining as u64)
        } else {
            None
        }
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Expiration accepted by `claim`: a new record must start out live.
pub fn validate_claim_expiration(days: i64) -> Result<()> {
    if !(1..=MAX_EXPIRATION_DAYS).contains(&days) {
        return Err(Error::InvalidArgument(format!(
            "expiration must be between 1 and {} days, got {}",
            MAX_EXPIRATION_DAYS, days
        )));
    }
    Ok(())
}

/// Expiration accepted by `reassign`: non-positive values force-expire.
pub fn validate_reassign_expiration(days: i64) -> Result<()> {
    if !(-MAX_EXPIRATION_DAYS..=MAX_EXPIRATION_DAYS).contains(&days) {
        return Err(Error::InvalidArgument(format!(
            "expiration must be within {} days, got {}",
            MAX_EXPIRATION_DAYS, days
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_window() {
        let record = UrlRecord {
            long_url: "https://x".into(),
            created_at: 1_000,
            expiration_days: 1,
        };
        assert_eq!(record.expires_at(), 1_000 + MILLIS_PER_DAY);
        assert!(record.is_live(1_000));
        assert!(record.is_live(MILLIS_PER_DAY));
        assert!(!record.is_live(1_000 + MILLIS_PER_DAY));
    }

    #[test]
    fn test_zero_and_negative_windows_are_expired() {
        let mut record = UrlRecord::new("https://x", 0);
        assert!(!record.is_live(record.created_at));
        record.expiration_days = -1;
        assert!(!record.is_live(record.created_at));
        assert_eq!(record.remaining_ms(record.created_at), None);
    }

    #[test]
    fn test_remaining_ms() {
        let record = UrlRecord {
            long_url: "https://x".into(),
            created_at: 0,
            expiration_days: 2,
        };
        assert_eq!(record.remaining_ms(MILLIS_PER_DAY), Some(MILLIS_PER_DAY as u64));
    }

    #[test]
    fn test_expiration_bounds() {
        assert!(validate_claim_expiration(1).is_ok());
        assert!(validate_claim_expiration(MAX_EXPIRATION_DAYS).is_ok());
        assert!(validate_claim_expiration(0).is_err());
        assert!(validate_claim_expiration(MAX_EXPIRATION_DAYS + 1).is_err());

        assert!(validate_reassign_expiration(0).is_ok());
        assert!(validate_reassign_expiration(-1).is_ok());
        assert!(validate_reassign_expiration(-MAX_EXPIRATION_DAYS - 1).is_err());
    }
}
