//! Embedding provider boundary.
//!
//! The dense signal comes from an external service negotiated once per
//! deployment; this crate only defines the contract plus a deterministic
//! mock used by tests.

use crate::error::EmbedError;

/// External embedding service: `embed(text) -> vector`.
///
/// The vector dimension is fixed per deployment; callers validate it against
/// the manifest and treat a mismatch as a fatal configuration error.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable or misbehaves.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbedError>> + Send;

    fn name(&self) -> &'static str;
}

/// Deterministic pseudo-embedding for tests: a unit-normalized vector seeded
/// from the blake3 digest of the input. Equal texts embed equally; different
/// texts almost surely differ.
#[cfg(feature = "mock")]
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    pub dimensions: usize,
}

#[cfg(feature = "mock")]
impl Default for HashEmbedding {
    fn default() -> Self {
        Self { dimensions: 64 }
    }
}

#[cfg(feature = "mock")]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut reader = blake3::Hasher::new().update(text.as_bytes()).finalize_xof();
        let mut bytes = vec![0u8; self.dimensions];
        reader.fill(&mut bytes);

        let mut v: Vec<f32> = bytes
            .into_iter()
            .map(|b| (f32::from(b) - 127.5) / 127.5)
            .collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn name(&self) -> &'static str {
        "hash-mock"
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_is_deterministic() {
        let provider = HashEmbedding::default();
        let a = provider.embed("fn main() {}").await.unwrap();
        let b = provider.embed("fn main() {}").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn mock_distinguishes_texts() {
        let provider = HashEmbedding::default();
        let a = provider.embed("alpha").await.unwrap();
        let b = provider.embed("beta").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn mock_has_fixed_dimension_and_unit_norm() {
        let provider = HashEmbedding { dimensions: 32 };
        let v = provider.embed("anything").await.unwrap();
        assert_eq!(v.len(), 32);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
