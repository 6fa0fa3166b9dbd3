//! Embedding provider boundary and vector math.
//!
//! The orchestrator never talks to an embedding service directly: it goes
//! through the [`EmbeddingProvider`] trait, wrapped by the content-addressed
//! [`EmbeddingCache`]. Queries are keyed by a [`fingerprint`] of their
//! normalized text so identical queries hit the cache regardless of
//! surrounding whitespace or Unicode composition.

pub mod cache;

pub use cache::{CacheStats, EmbeddingCache};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::error::MoeError;

/// Trait for embedding service backends.
///
/// Implementations handle the transport layer for a specific provider.
/// Both methods may raise transport or quota errors; neither retries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g. `"openai"`).
    fn name(&self) -> &'static str;

    /// Embeds a single text.
    ///
    /// # Errors
    ///
    /// Returns [`MoeError::EmbeddingUnavailable`] on transport failures or
    /// malformed responses.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MoeError>;

    /// Embeds a batch of texts in one upstream call, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`MoeError::EmbeddingUnavailable`] on transport failures or
    /// malformed responses.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MoeError>;
}

/// Normalizes text for fingerprinting: NFC plus leading/trailing
/// whitespace trimmed.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.trim().nfc().collect()
}

/// Content address for a query: hex SHA-256 of the normalized text.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when the dimensions differ or either vector has zero norm,
/// so degenerate inputs score as unrelated rather than erroring.
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
