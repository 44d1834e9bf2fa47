//! Answer generation from ranked context
//!
//! [`AnswerGenerator`] owns the policy (empty context short-circuit, prompt
//! layout, confidence blending); a [`TextGenerator`] backend only turns a
//! prompt into text.

mod extractive;
mod openai;

pub use extractive::ExtractiveGenerator;
pub use openai::OpenAiCompatibleGenerator;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::retrieval::RankedContext;
use regex::Regex;
use std::sync::{Arc, LazyLock};

/// Answer returned when no context survived ranking
pub const NO_INFORMATION_ANSWER: &str =
    "I could not find any relevant information in the available documents to answer this question.";

const SYSTEM_INSTRUCTIONS: &str = "You answer questions using only the numbered documents provided. \
Cite documents by their file name. If the documents do not contain the answer, say so. \
End your reply with a final line of the form \"Confidence: <number between 0 and 1>\" \
stating how well the documents support your answer.";

static CONFIDENCE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*confidence\s*[:=]\s*([0-9]*\.?[0-9]+)\s*(%?)\s*$")
        .unwrap_or_else(|e| panic!("invalid confidence pattern: {}", e))
});

/// One numbered document in a prompt
#[derive(Debug, Clone, PartialEq)]
pub struct PromptDocument {
    pub label: String,
    pub text: String,
}

/// Structured prompt handed to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub documents: Vec<PromptDocument>,
    pub question: String,
}

impl Prompt {
    pub fn from_context(question: &str, context: &RankedContext) -> Self {
        Self {
            system: SYSTEM_INSTRUCTIONS.to_string(),
            documents: context
                .chunks
                .iter()
                .map(|c| PromptDocument {
                    label: c.relative_path.clone(),
                    text: c.text.clone(),
                })
                .collect(),
            question: question.to_string(),
        }
    }

    /// User message: numbered documents followed by the question
    pub fn render_user(&self) -> String {
        let mut out = String::from("Documents:\n\n");
        for (i, doc) in self.documents.iter().enumerate() {
            out.push_str(&format!("[{}] {}\n{}\n\n", i + 1, doc.label, doc.text.trim()));
        }
        out.push_str(&format!("Question: {}\nAnswer:", self.question));
        out
    }
}

/// Text generation backend
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;

    fn name(&self) -> &str;
}

/// Build the backend named by the configuration
pub fn from_config(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>, GenerationError> {
    match config.backend.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator::new())),
        "openai" => Ok(Arc::new(OpenAiCompatibleGenerator::from_config(config)?)),
        other => Err(GenerationError::NotConfigured(format!(
            "unknown generation backend '{}'",
            other
        ))),
    }
}

/// Final answer text and its confidence in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub confidence: f32,
}

impl GeneratedAnswer {
    pub fn no_information() -> Self {
        Self {
            answer: NO_INFORMATION_ANSWER.to_string(),
            confidence: 0.0,
        }
    }
}

pub struct AnswerGenerator {
    backend: Arc<dyn TextGenerator>,
}

impl AnswerGenerator {
    pub fn new(backend: Arc<dyn TextGenerator>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Generate an answer for `question` from `context`
    ///
    /// An empty context yields [`NO_INFORMATION_ANSWER`] with confidence 0 and
    /// never reaches the backend. Otherwise the confidence is the top
    /// retrieval score, averaged with the backend's self-reported certainty
    /// when it gave one.
    pub async fn generate(
        &self,
        question: &str,
        context: &RankedContext,
    ) -> Result<GeneratedAnswer, GenerationError> {
        let Some(top_score) = context.top_score() else {
            return Ok(GeneratedAnswer::no_information());
        };

        let prompt = Prompt::from_context(question, context);
        let raw = self.backend.generate(&prompt).await?;
        let (answer, reported) = split_confidence(&raw);
        if answer.is_empty() {
            return Err(GenerationError::InvalidResponse(
                "backend returned an empty answer".to_string(),
            ));
        }

        let confidence = match reported {
            Some(reported) => 0.5 * top_score + 0.5 * reported,
            None => top_score,
        };
        Ok(GeneratedAnswer {
            answer,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

/// Strip a trailing `Confidence: x` line, returning the answer and the value
///
/// Percentages are scaled to [0, 1]; out-of-range values are clamped.
pub fn split_confidence(raw: &str) -> (String, Option<f32>) {
    let mut reported = None;
    let mut answer = raw.to_string();

    if let Some(caps) = CONFIDENCE_LINE.captures_iter(raw).last()
        && let (Some(whole), Some(value)) = (caps.get(0), caps.get(1))
        && let Ok(parsed) = value.as_str().parse::<f32>()
    {
        let is_percent = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
        let scaled = if is_percent || parsed > 1.0 {
            parsed / 100.0
        } else {
            parsed
        };
        reported = Some(scaled.clamp(0.0, 1.0));
        answer = format!("{}{}", &raw[..whole.start()], &raw[whole.end()..]);
    }

    (answer.trim().to_string(), reported)
}
