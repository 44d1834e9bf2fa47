//! Text embedding backends
//!
//! Embedding is CPU-bound and blocking; async callers run it on the blocking
//! pool (see the sync orchestrator and the retriever).

mod fastembed_manager;
mod hashing;

pub use fastembed_manager::FastEmbedManager;
pub use hashing::{HashingEmbedder, tokenize};

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of text, one vector per input
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the dimension of the embeddings
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Embed a single query string
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(vec![text.to_string()])?
            .pop()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }
}

/// Build the embedder named by the configuration
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    if config.model_name.eq_ignore_ascii_case("hashing") {
        return Ok(Arc::new(HashingEmbedder::new(config.hashing_dimension)));
    }
    Ok(Arc::new(FastEmbedManager::from_model_name(&config.model_name)?))
}

/// Check that a backend returned one vector of the right width per input
pub fn check_batch(
    embeddings: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if embeddings.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            actual: embeddings.len(),
        });
    }
    if let Some(bad) = embeddings.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Run `embed_batch` on the blocking pool with a deadline, validating the output
pub async fn embed_with_timeout(
    provider: Arc<dyn EmbeddingProvider>,
    texts: Vec<String>,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let expected = texts.len();
    let dimension = provider.dimension();
    let task = tokio::task::spawn_blocking(move || provider.embed_batch(texts));

    let embeddings = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => {
            return Err(EmbeddingError::GenerationFailed(format!(
                "embedding task panicked: {}",
                e
            )));
        }
        Err(_) => return Err(EmbeddingError::Timeout(timeout.as_secs())),
    };

    check_batch(&embeddings, expected, dimension)?;
    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_hashing() {
        let config = EmbeddingConfig {
            model_name: "hashing".to_string(),
            hashing_dimension: 64,
            ..EmbeddingConfig::default()
        };
        let embedder = from_config(&config).unwrap();
        assert_eq!(embedder.dimension(), 64);
        assert_eq!(embedder.model_name(), "hashing");
    }

    #[test]
    fn test_from_config_unknown_model() {
        let config = EmbeddingConfig {
            model_name: "no-such-model".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            from_config(&config),
            Err(EmbeddingError::InitializationFailed(_))
        ));
    }

    #[test]
    fn test_check_batch() {
        let good = vec![vec![0.0; 4], vec![1.0; 4]];
        assert!(check_batch(&good, 2, 4).is_ok());
        assert!(matches!(
            check_batch(&good, 3, 4),
            Err(EmbeddingError::CountMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            check_batch(&good, 2, 8),
            Err(EmbeddingError::DimensionMismatch { expected: 8, actual: 4 })
        ));
    }

    #[test]
    fn test_embed_query_default() {
        let embedder = HashingEmbedder::new(32);
        let vector = embedder.embed_query("vacation policy").unwrap();
        assert_eq!(vector.len(), 32);
    }

    struct SlowEmbedder;

    impl EmbeddingProvider for SlowEmbedder {
        fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(texts.iter().map(|_| vec![0.0; 2]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_embed_with_timeout() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(16));
        let vectors = embed_with_timeout(
            embedder,
            vec!["a".to_string(), "b".to_string()],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(vectors.len(), 2);

        let slow: Arc<dyn EmbeddingProvider> = Arc::new(SlowEmbedder);
        let result = embed_with_timeout(slow, vec!["a".to_string()], Duration::from_millis(20)).await;
        assert!(matches!(result, Err(EmbeddingError::Timeout(_))));
    }
}
