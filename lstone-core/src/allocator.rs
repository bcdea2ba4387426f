use crate::backend::{ClaimOutcome, StorageBackend};
use crate::config::{ShortenerConfig, TokenMode};
use crate::token::{FixedTokenGenerator, RandomTokenGenerator, Token, TokenGenerator};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Advisory estimate of how many claim attempts fit in one budget window.
///
/// Recomputed after every allocation as `attempts * (budget / elapsed)` and
/// stored with a relaxed atomic write. Concurrent allocations race
/// last-writer-wins; the value feeds health reporting and is never used for
/// correctness.
#[derive(Debug, Clone, Default)]
pub struct CapacityEstimate {
    value: Arc<AtomicU64>,
}

impl CapacityEstimate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest estimate, 0 until the first allocation with attempts
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Store a new estimate from one allocation's figures.
    pub fn record(&self, attempts: u64, budget: Duration, elapsed: Duration) {
        if attempts == 0 {
            return;
        }
        let elapsed = elapsed.as_secs_f64().max(1e-9);
        let estimate = attempts as f64 * (budget.as_secs_f64() / elapsed);
        self.value.store(estimate.round().min(u64::MAX as f64) as u64, Ordering::Relaxed);
    }
}

/// A successfully claimed token and how it was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub token: Token,
    /// Claim calls made, including the winning one
    pub attempts: u64,
    /// True when the winning claim overwrote an expired record
    pub reclaimed: bool,
    pub elapsed: Duration,
}

/// Time-bounded allocation loop.
///
/// Draws candidates from the generator and claims them in the backend until
/// one sticks or the budget runs out. Collisions retry immediately;
/// infrastructure errors end the loop at once.
pub struct Allocator {
    backend: Arc<dyn StorageBackend>,
    generator: Arc<dyn TokenGenerator>,
    capacity: CapacityEstimate,
}

impl Allocator {
    pub fn new(backend: Arc<dyn StorageBackend>, generator: Arc<dyn TokenGenerator>) -> Result<Self> {
        if backend.token_length() != generator.token_length() {
            return Err(Error::InvalidConfig(format!(
                "generator produces {}-character tokens but backend expects {}",
                generator.token_length(),
                backend.token_length()
            )));
        }
        Ok(Self {
            backend,
            generator,
            capacity: CapacityEstimate::new(),
        })
    }

    /// Build the generator named by `config` and pair it with `backend`.
    pub fn from_config(config: &ShortenerConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        Self::new(backend, build_generator(config)?)
    }

    /// Handle to the shared capacity estimate
    pub fn capacity(&self) -> &CapacityEstimate {
        &self.capacity
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Claim a fresh token for `long_url` within `budget`.
    ///
    /// The deadline is checked between iterations only, so an in-flight
    /// claim may finish after it. Fails with `DeadlineExceeded` when every
    /// attempt collided. A budget too large to add to the clock means no
    /// deadline.
    pub fn allocate(&self, long_url: &str, expiration_days: i64, budget: Duration) -> Result<Allocation> {
        self.allocate_counted(long_url, expiration_days, budget).0
    }

    /// Like [`Allocator::allocate`], also returning the number of claim
    /// calls made whatever the outcome.
    pub fn allocate_counted(
        &self,
        long_url: &str,
        expiration_days: i64,
        budget: Duration,
    ) -> (Result<Allocation>, u64) {
        let start = Instant::now();
        let deadline = start.checked_add(budget);
        let mut attempts: u64 = 0;

        let result = loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break Err(Error::DeadlineExceeded { attempts, budget });
            }

            let candidate = match self.generator.generate() {
                Ok(token) => token,
                Err(e) => break Err(e),
            };

            attempts += 1;
            match self.backend.claim(&candidate, long_url, expiration_days) {
                Ok(ClaimOutcome::Collision) => {
                    trace!(token = %candidate, attempts, "Token collision, retrying");
                }
                Ok(outcome) => {
                    break Ok(Allocation {
                        token: candidate,
                        attempts,
                        reclaimed: outcome == ClaimOutcome::Reclaimed,
                        elapsed: start.elapsed(),
                    });
                }
                Err(e) => break Err(e),
            }
        };

        let elapsed = start.elapsed();
        self.capacity.record(attempts, budget, elapsed);

        match &result {
            Ok(allocation) => debug!(
                token = %allocation.token,
                attempts,
                reclaimed = allocation.reclaimed,
                elapsed_us = elapsed.as_micros() as u64,
                "Allocated token"
            ),
            Err(Error::DeadlineExceeded { .. }) => warn!(
                attempts,
                budget_ms = budget.as_millis() as u64,
                backend = self.backend.kind(),
                "Allocation budget exhausted"
            ),
            Err(e) => warn!(error = %e, attempts, "Allocation failed"),
        }

        (result, attempts)
    }
}

/// Generator selected by the configuration's token mode.
pub fn build_generator(config: &ShortenerConfig) -> Result<Arc<dyn TokenGenerator>> {
    match &config.token_mode {
        TokenMode::Random => Ok(Arc::new(RandomTokenGenerator::new(config.token_length)?)),
        TokenMode::Fixed(tokens) => {
            let generator = FixedTokenGenerator::new(tokens)?;
            if generator.token_length() != config.token_length {
                return Err(Error::InvalidConfig(format!(
                    "fixed tokens have length {}, expected {}",
                    generator.token_length(),
                    config.token_length
                )));
            }
            Ok(Arc::new(generator))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AtomicKvBackend, InMemoryKv};
    use std::sync::atomic::AtomicUsize;

    /// Backend whose claims are scripted; reads and writes are unsupported.
    struct ScriptedBackend {
        outcomes: Vec<ClaimOutcome>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl ScriptedBackend {
        fn new(outcomes: Vec<ClaimOutcome>) -> Self {
            Self { outcomes, calls: AtomicUsize::new(0), fail: false }
        }

        fn failing() -> Self {
            Self { outcomes: vec![], calls: AtomicUsize::new(0), fail: true }
        }
    }

    impl StorageBackend for ScriptedBackend {
        fn claim(&self, _token: &str, _url: &str, _days: i64) -> Result<ClaimOutcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Internal("connection reset".to_string()));
            }
            Ok(*self.outcomes.get(n).unwrap_or(&ClaimOutcome::Collision))
        }
        fn read(&self, token: &str) -> Result<String> {
            Err(Error::NotFound(token.to_string()))
        }
        fn reassign(&self, token: &str, _days: i64) -> Result<()> {
            Err(Error::NotFound(token.to_string()))
        }
        fn remove(&self, _token: &str) -> Result<()> {
            Ok(())
        }
        fn purge_expired(&self) -> Result<u64> {
            Ok(0)
        }
        fn kind(&self) -> &'static str {
            "scripted"
        }
        fn token_length(&self) -> usize {
            6
        }
    }

    fn allocator(backend: ScriptedBackend) -> (Allocator, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let generator = Arc::new(RandomTokenGenerator::new(6).unwrap());
        (Allocator::new(backend.clone(), generator).unwrap(), backend)
    }

    #[test]
    fn test_first_claim_wins() {
        let (alloc, backend) = allocator(ScriptedBackend::new(vec![ClaimOutcome::Created]));
        let allocation = alloc.allocate("https://x", 1, Duration::from_secs(1)).unwrap();
        assert_eq!(allocation.attempts, 1);
        assert!(!allocation.reclaimed);
        assert_eq!(allocation.token.len(), 6);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_collisions_retry_until_claimed() {
        let (alloc, backend) = allocator(ScriptedBackend::new(vec![
            ClaimOutcome::Collision,
            ClaimOutcome::Collision,
            ClaimOutcome::Reclaimed,
        ]));
        let allocation = alloc.allocate("https://x", 1, Duration::from_secs(1)).unwrap();
        assert_eq!(allocation.attempts, 3);
        assert!(allocation.reclaimed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(alloc.capacity().get() > 0);
    }

    #[test]
    fn test_deadline_exhaustion() {
        let (alloc, _) = allocator(ScriptedBackend::new(vec![]));
        let budget = Duration::from_millis(50);
        let start = Instant::now();

        match alloc.allocate("https://x", 1, budget) {
            Err(Error::DeadlineExceeded { attempts, budget: b }) => {
                assert!(attempts > 0);
                assert_eq!(b, budget);
            }
            other => panic!("expected DeadlineExceeded, got {:?}", other),
        }
        assert!(start.elapsed() >= budget);
    }

    #[test]
    fn test_infrastructure_error_not_retried() {
        let (alloc, backend) = allocator(ScriptedBackend::failing());
        let err = alloc.allocate("https://x", 1, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        // One attempt still feeds the estimate
        assert!(alloc.capacity().get() > 0);
    }

    #[test]
    fn test_unbounded_budget_does_not_overflow() {
        let (alloc, _) = allocator(ScriptedBackend::new(vec![
            ClaimOutcome::Collision,
            ClaimOutcome::Created,
        ]));
        let allocation = alloc.allocate("https://x", 1, Duration::MAX).unwrap();
        assert_eq!(allocation.attempts, 2);
    }

    #[test]
    fn test_attempts_counted_on_failure() {
        let (alloc, _) = allocator(ScriptedBackend::failing());
        let (result, attempts) = alloc.allocate_counted("https://x", 1, Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(attempts, 1);

        let (alloc, _) = allocator(ScriptedBackend::new(vec![
            ClaimOutcome::Collision,
            ClaimOutcome::Created,
        ]));
        let (result, attempts) = alloc.allocate_counted("https://x", 1, Duration::from_secs(1));
        assert_eq!(result.unwrap().attempts, attempts);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_capacity_estimate_math() {
        let estimate = CapacityEstimate::new();
        estimate.record(0, Duration::from_millis(100), Duration::from_millis(10));
        assert_eq!(estimate.get(), 0);

        estimate.record(5, Duration::from_millis(100), Duration::from_millis(10));
        assert_eq!(estimate.get(), 50);

        // Last writer wins
        estimate.record(2, Duration::from_millis(100), Duration::from_millis(100));
        assert_eq!(estimate.get(), 2);
    }

    #[test]
    fn test_capacity_estimate_shared_between_clones() {
        let estimate = CapacityEstimate::new();
        let clone = estimate.clone();
        estimate.record(3, Duration::from_millis(30), Duration::from_millis(30));
        assert_eq!(clone.get(), 3);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let backend = Arc::new(AtomicKvBackend::new(InMemoryKv::new(), 6));
        let generator = Arc::new(RandomTokenGenerator::new(8).unwrap());
        assert!(matches!(Allocator::new(backend, generator), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_build_generator_defaults_to_random() {
        let generator = build_generator(&ShortenerConfig::default()).unwrap();
        assert_eq!(generator.token_length(), 6);
        assert_ne!(generator.generate().unwrap(), generator.generate().unwrap());
    }

    #[test]
    fn test_build_generator_fixed() {
        let config = ShortenerConfig::new().with_fixed_tokens(["AAAAAA"]);
        let generator = build_generator(&config).unwrap();
        assert_eq!(generator.generate().unwrap().as_str(), "AAAAAA");
        assert_eq!(generator.generate().unwrap().as_str(), "AAAAAA");
    }
}
