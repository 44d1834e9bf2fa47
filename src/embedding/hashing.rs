use super::EmbeddingProvider;
use crate::error::EmbeddingError;

/// Words too common to carry meaning in a bag-of-words vector
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "in",
    "is", "it", "of", "on", "or", "our", "that", "the", "this", "to", "was", "we", "what", "when",
    "where", "which", "who", "why", "with", "you", "your",
];

/// Deterministic feature-hashing embedder
///
/// Each lowercase alphanumeric token (minus stopwords) is hashed with FNV-1a
/// into one of `dimension` buckets and the counts are L2-normalised. Vectors
/// are non-negative, so cosine similarity falls in [0, 1]. Needs no model
/// files, which keeps the whole pipeline runnable offline.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

/// Lowercased alphanumeric tokens with stopwords and trailing plural `s` removed
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| {
            if t.len() > 3 && t.ends_with('s') && !t.ends_with("ss") {
                t[..t.len() - 1].to_string()
            } else {
                t
            }
        })
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(128);
        let a = embedder.embed_one("Vacation policy for employees");
        let b = embedder.embed_one("Vacation policy for employees");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed_one("").iter().all(|v| *v == 0.0));
        assert!(embedder.embed_one("the and of").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_related_text_scores_higher() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed_one("What is the vacation policy?");
        let policy = embedder.embed_one("Vacation policy: employees receive 20 vacation days.");
        let mission = embedder.embed_one("Our mission is to build great software.");
        assert!(cosine(&query, &policy) > cosine(&query, &mission));
        assert!(cosine(&query, &mission) >= 0.0);
    }

    #[test]
    fn test_tokenize() {
        let tokens: Vec<String> = tokenize("The Policies, and DAYS off!").collect();
        assert_eq!(tokens, vec!["policie", "day", "off"]);
    }

    #[test]
    fn test_batch_shape() {
        let embedder = HashingEmbedder::new(8);
        let out = embedder
            .embed_batch(vec!["one".to_string(), "two".to_string()])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.len() == 8));
    }
}
