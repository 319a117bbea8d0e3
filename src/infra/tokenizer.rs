//! BPE tokenizer adapter backed by tiktoken-rs with token-count caching.
//!
//! One tokenizer instance is memoized per name for the process lifetime;
//! the supported name set is small and fixed, so the memo needs no
//! eviction. Counting is deterministic and side-effect-free.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use moka::sync::Cache;
use once_cell::sync::Lazy;
use thiserror::Error;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model, o200k_base};
use xxhash_rust::xxh64::Xxh64;

/// A tokenizer name neither `get_bpe_from_model` nor the encoding
/// fallbacks recognize.
#[derive(Debug, Error)]
#[error("unsupported model or encoding: {0}")]
pub struct UnsupportedTokenizer(pub String);

/// Process-wide memo of loaded tokenizers, keyed by lowercase name.
static TOKENIZERS: Lazy<RwLock<HashMap<String, Arc<Tokenizer>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Tokenizer with a cached `count` fast path.
pub struct Tokenizer {
    /// Byte Pair Encoding (BPE) tokenizer for counting tokens
    bpe: CoreBPE,

    /// Token count cache for fast repeated queries
    counts: Cache<u64, usize>,
}

impl Tokenizer {
    /// Load a tokenizer for a model or encoding name.
    ///
    /// Supported values include model names (e.g., "gpt-4") or encoding
    /// names ("cl100k_base", "o200k_base"). Model lookup is tried first,
    /// falling back to encoding names.
    fn load(model_or_encoding: &str) -> Result<Self> {
        let lower = model_or_encoding.to_ascii_lowercase();

        let bpe = match get_bpe_from_model(&lower) {
            Ok(b) => b,
            Err(_) => match lower.as_str() {
                "o200k_base" => o200k_base().context("load o200k_base")?,
                "cl100k_base" => cl100k_base().context("load cl100k_base")?,
                _ => return Err(UnsupportedTokenizer(model_or_encoding.to_string()).into()),
            },
        };

        Ok(Self {
            bpe,
            counts: Cache::new(100_000),
        })
    }

    /// Shared tokenizer for `name`, loading and memoizing on first use.
    pub fn for_name(name: &str) -> Result<Arc<Self>> {
        let key = name.to_ascii_lowercase();

        if let Some(t) = TOKENIZERS.read().expect("tokenizer memo poisoned").get(&key) {
            return Ok(Arc::clone(t));
        }

        let loaded = Arc::new(Self::load(name)?);
        let mut memo = TOKENIZERS.write().expect("tokenizer memo poisoned");

        // A racing loader may have beaten us; keep the first instance.
        Ok(Arc::clone(memo.entry(key).or_insert(loaded)))
    }

    /// Encode `text` into its token id sequence.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_ordinary(text)
    }

    /// Count the number of tokens in `text`, using the cache for
    /// efficiency. Uses xxhash64 to hash the string as cache key.
    pub fn count(&self, text: &str) -> usize {
        let mut hasher = Xxh64::new(0);
        hasher.update(text.as_bytes());
        let key = hasher.digest();

        if let Some(t) = self.counts.get(&key) {
            return t;
        }

        let t = self.bpe.encode_ordinary(text).len();
        self.counts.insert(key, t);
        t
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_matches_encode_length() {
        let tok = Tokenizer::for_name("cl100k_base").expect("load");
        let text = "fn main() { println!(\"hello\"); }";
        assert_eq!(tok.count(text), tok.encode(text).len());
        // Second call exercises the cache path.
        assert_eq!(tok.count(text), tok.encode(text).len());
    }

    #[test]
    fn memo_returns_same_instance() {
        let a = Tokenizer::for_name("cl100k_base").expect("load");
        let b = Tokenizer::for_name("CL100K_BASE").expect("load");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert!(Tokenizer::for_name("not-a-tokenizer").is_err());
    }

    #[test]
    fn empty_text_counts_zero() {
        let tok = Tokenizer::for_name("cl100k_base").expect("load");
        assert_eq!(tok.count(""), 0);
    }
}
