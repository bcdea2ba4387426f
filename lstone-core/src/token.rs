/// Short token type and the generators that produce candidates
///
/// Tokens are drawn from a 64-symbol URL-safe alphabet, so each random byte
/// maps onto exactly one symbol without modulo bias.

use crate::{Error, Result};
use rand::rngs::OsRng;
use rand::TryRngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};

/// URL-safe alphabet (RFC 4648 base64url symbols).
pub const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Default token length in characters.
pub const DEFAULT_TOKEN_LENGTH: usize = 6;

/// Longest token length a configuration may request.
pub const MAX_TOKEN_LENGTH: usize = 64;

/// A short public identifier for a stored URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Parse user input into a token, enforcing the configured length.
    pub fn parse(s: &str, length: usize) -> Result<Self> {
        validate_token(s, length)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for Token {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

/// Reject tokens whose length differs from the configured length.
///
/// Shared by every backend and run before storage is touched.
pub fn validate_token(token: &str, length: usize) -> Result<()> {
    let actual = token.chars().count();
    if actual != length {
        return Err(Error::InvalidArgument(format!(
            "token '{}' has length {}, expected {}",
            token, actual, length
        )));
    }
    Ok(())
}

/// Source of candidate tokens.
///
/// Generators promise nothing about uniqueness; the allocator resolves
/// collisions against the backend.
pub trait TokenGenerator: Send + Sync {
    /// Produce the next candidate token.
    fn generate(&self) -> Result<Token>;

    /// Length of every token this generator produces.
    fn token_length(&self) -> usize;
}

/// Uniform random tokens from the operating system's secure random source.
#[derive(Debug, Clone)]
pub struct RandomTokenGenerator {
    length: usize,
}

impl RandomTokenGenerator {
    pub fn new(length: usize) -> Result<Self> {
        if length == 0 || length > MAX_TOKEN_LENGTH {
            return Err(Error::InvalidConfig(format!(
                "token length must be between 1 and {}, got {}",
                MAX_TOKEN_LENGTH, length
            )));
        }
        Ok(Self { length })
    }
}

impl Default for RandomTokenGenerator {
    fn default() -> Self {
        Self { length: DEFAULT_TOKEN_LENGTH }
    }
}

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> Result<Token> {
        let mut bytes = vec![0u8; self.length];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| Error::RandomSource(e.to_string()))?;

        let token: String = bytes
            .iter()
            .map(|b| ALPHABET[(b & 0x3f) as usize] as char)
            .collect();
        Ok(Token(token))
    }

    fn token_length(&self) -> usize {
        self.length
    }
}

/// Deterministic generator for test harnesses.
///
/// Cycles through a fixed list of tokens. Never selected unless a
/// configuration asks for [`crate::config::TokenMode::Fixed`] explicitly.
#[derive(Debug)]
pub struct FixedTokenGenerator {
    tokens: Vec<Token>,
    next: AtomicUsize,
    length: usize,
}

impl FixedTokenGenerator {
    /// Build a generator that repeats `tokens` in order.
    ///
    /// All tokens must share one length and the list must not be empty.
    pub fn new<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let raw: Vec<String> = tokens.into_iter().map(|s| s.as_ref().to_string()).collect();
        let length = match raw.first() {
            Some(first) => first.chars().count(),
            None => {
                return Err(Error::InvalidConfig(
                    "fixed token generator needs at least one token".to_string(),
                ))
            }
        };

        let tokens = raw
            .iter()
            .map(|s| Token::parse(s, length))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        Ok(Self {
            tokens,
            next: AtomicUsize::new(0),
            length,
        })
    }

    /// Generator that always yields the same token.
    pub fn single(token: &str) -> Result<Self> {
        Self::new([token])
    }
}

impl TokenGenerator for FixedTokenGenerator {
    fn generate(&self) -> Result<Token> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.tokens.len();
        Ok(self.tokens[idx].clone())
    }

    fn token_length(&self) -> usize {
        self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_alphabet_is_unique() {
        let set: HashSet<u8> = ALPHABET.iter().copied().collect();
        assert_eq!(set.len(), 64);
    }

    #[test]
    fn test_random_default_length() {
        let gen = RandomTokenGenerator::default();
        let token = gen.generate().unwrap();
        assert_eq!(token.len(), DEFAULT_TOKEN_LENGTH);
        assert_eq!(gen.token_length(), DEFAULT_TOKEN_LENGTH);
    }

    #[test]
    fn test_random_rejects_bad_length() {
        assert!(matches!(RandomTokenGenerator::new(0), Err(Error::InvalidConfig(_))));
        assert!(matches!(
            RandomTokenGenerator::new(MAX_TOKEN_LENGTH + 1),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_random_tokens_vary() {
        let gen = RandomTokenGenerator::new(12).unwrap();
        let tokens: HashSet<Token> = (0..100).map(|_| gen.generate().unwrap()).collect();
        // 72 bits of entropy per token; a repeat here means the source is broken
        assert_eq!(tokens.len(), 100);
    }

    #[test]
    fn test_fixed_cycles() {
        let gen = FixedTokenGenerator::new(["aaaaaa", "bbbbbb"]).unwrap();
        assert_eq!(gen.generate().unwrap().as_str(), "aaaaaa");
        assert_eq!(gen.generate().unwrap().as_str(), "bbbbbb");
        assert_eq!(gen.generate().unwrap().as_str(), "aaaaaa");
        assert_eq!(gen.token_length(), 6);
    }

    #[test]
    fn test_fixed_rejects_mixed_lengths() {
        assert!(FixedTokenGenerator::new(["abc", "abcd"]).is_err());
        assert!(FixedTokenGenerator::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_validate_token() {
        assert!(validate_token("abc123", 6).is_ok());
        assert!(matches!(validate_token("abc12", 6), Err(Error::InvalidArgument(_))));
        assert!(matches!(validate_token("", 6), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_token_serde_transparent() {
        let token = Token::parse("Ab-_9z", 6).unwrap();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"Ab-_9z\"");
    }

    proptest! {
        #[test]
        fn prop_random_tokens_use_alphabet(length in 1usize..=MAX_TOKEN_LENGTH) {
            let gen = RandomTokenGenerator::new(length).unwrap();
            let token = gen.generate().unwrap();
            prop_assert_eq!(token.len(), length);
            prop_assert!(token.bytes().all(|b| ALPHABET.contains(&b)));
            prop_assert!(Token::parse(&token, length).is_ok());
        }
    }
}
