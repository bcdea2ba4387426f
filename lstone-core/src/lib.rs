//! Token allocation core for LinkStone.
//!
//! Maps short tokens to long URLs with an expiration policy. The
//! [`Allocator`] draws candidates from a [`TokenGenerator`] and claims them
//! in a [`StorageBackend`] within a wall-clock budget; backends guarantee
//! that at most one live record exists per token.

pub mod allocator;
pub mod backend;
pub mod config;
pub mod error;
pub mod record;
pub mod sweeper;
pub mod token;

pub use allocator::{build_generator, Allocation, Allocator, CapacityEstimate};
pub use backend::{open_backend, ClaimOutcome, StorageBackend};
pub use config::{BackendConfig, ShortenerConfig, TokenMode};
pub use error::{Error, Result};
pub use record::UrlRecord;
pub use sweeper::ExpirySweeper;
pub use token::{FixedTokenGenerator, RandomTokenGenerator, Token, TokenGenerator};
