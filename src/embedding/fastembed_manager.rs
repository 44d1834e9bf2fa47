use super::EmbeddingProvider;
use crate::error::EmbeddingError;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;

/// FastEmbed-based embedding provider (local ONNX models)
pub struct FastEmbedManager {
    // `TextEmbedding::embed` needs `&mut self`
    model: Mutex<TextEmbedding>,
    dimension: usize,
    model_name: String,
}

/// Supported model names, their fastembed model and output dimension
const MODELS: &[(&str, EmbeddingModel, usize)] = &[
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2, 384),
    ("all-MiniLM-L12-v2", EmbeddingModel::AllMiniLML12V2, 384),
    ("BAAI/bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384),
    ("BAAI/bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15, 768),
];

impl FastEmbedManager {
    /// Create a new FastEmbedManager with the default model (all-MiniLM-L6-v2)
    pub fn new() -> Result<Self, EmbeddingError> {
        Self::from_model_name("all-MiniLM-L6-v2")
    }

    /// Look up a model by its configured name
    pub fn from_model_name(name: &str) -> Result<Self, EmbeddingError> {
        let (canonical, model, dimension) = MODELS
            .iter()
            .find(|(known, _, _)| known.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                EmbeddingError::InitializationFailed(format!(
                    "unknown embedding model '{}' (supported: {}, hashing)",
                    name,
                    MODELS
                        .iter()
                        .map(|(n, _, _)| *n)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })?;

        tracing::info!("Initializing FastEmbed model: {}", canonical);

        let mut options = InitOptions::default();
        options.model_name = model.clone();
        options.show_download_progress = true;

        let embedding_model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitializationFailed(e.to_string()))?;

        Ok(Self {
            model: Mutex::new(embedding_model),
            dimension: *dimension,
            model_name: canonical.to_string(),
        })
    }
}

impl EmbeddingProvider for FastEmbedManager {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut model = self
            .model
            .lock()
            .map_err(|e| EmbeddingError::BackendUnavailable(format!("model lock poisoned: {}", e)))?;
        model
            .embed(texts, None)
            .map_err(|e| EmbeddingError::GenerationFailed(e.to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests download model weights on first use.

    #[test]
    #[ignore = "downloads the ONNX model"]
    fn test_embedding_generation() {
        let manager = FastEmbedManager::new().unwrap();
        let texts = vec![
            "Employees receive twenty days of paid vacation.".to_string(),
            "Our mission is to make documents searchable.".to_string(),
        ];

        let embeddings = manager.embed_batch(texts).unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 384);
    }

    #[test]
    #[ignore = "downloads the ONNX model"]
    fn test_empty_batch() {
        let manager = FastEmbedManager::new().unwrap();
        assert!(manager.embed_batch(vec![]).unwrap().is_empty());
        assert_eq!(manager.model_name(), "all-MiniLM-L6-v2");
    }

    #[test]
    fn test_unknown_model_name() {
        let err = FastEmbedManager::from_model_name("gpt-embeddings-9000")
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown embedding model"));
    }

    #[test]
    fn test_model_table_dimensions() {
        let base = MODELS
            .iter()
            .find(|(name, _, _)| *name == "BAAI/bge-base-en-v1.5")
            .unwrap();
        assert_eq!(base.2, 768);
        assert!(MODELS.iter().all(|(_, _, dim)| *dim > 0));
    }
}
