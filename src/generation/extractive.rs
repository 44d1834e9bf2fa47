//! Offline backend that answers by quoting the best-matching sentences

use super::{Prompt, TextGenerator};
use crate::embedding::tokenize;
use crate::error::GenerationError;
use std::collections::HashSet;

const MAX_SENTENCES: usize = 2;

/// Picks the sentences sharing the most terms with the question
///
/// Reports the fraction of question terms it covered as its confidence.
#[derive(Debug, Default, Clone)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl TextGenerator for ExtractiveGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let terms: HashSet<String> = tokenize(&prompt.question).collect();

        // (overlap, document order, sentence order, label, sentence)
        let mut scored: Vec<(usize, usize, usize, &str, &str)> = Vec::new();
        for (doc_idx, doc) in prompt.documents.iter().enumerate() {
            for (sent_idx, sentence) in split_sentences(&doc.text).enumerate() {
                let words: HashSet<String> = tokenize(sentence).collect();
                let overlap = terms.intersection(&words).count();
                scored.push((overlap, doc_idx, sent_idx, doc.label.as_str(), sentence));
            }
        }
        if scored.is_empty() {
            return Err(GenerationError::InvalidResponse(
                "no text to extract an answer from".to_string(),
            ));
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        // Always the best sentence, plus runners-up that share at least one term
        let picked: Vec<_> = scored
            .iter()
            .take(MAX_SENTENCES)
            .enumerate()
            .filter(|(rank, s)| *rank == 0 || s.0 > 0)
            .map(|(_, s)| s)
            .collect();

        let mut covered = HashSet::new();
        let mut answer = String::new();
        for (_, _, _, label, sentence) in &picked {
            covered.extend(tokenize(sentence).filter(|t| terms.contains(t)));
            if !answer.is_empty() {
                answer.push(' ');
            }
            answer.push_str(&format!("{} ({})", sentence, label));
        }

        let confidence = if terms.is_empty() {
            0.0
        } else {
            covered.len() as f32 / terms.len() as f32
        };
        Ok(format!("{}\nConfidence: {:.2}", answer, confidence))
    }

    fn name(&self) -> &str {
        "extractive"
    }
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{PromptDocument, split_confidence};

    fn prompt(question: &str, docs: &[(&str, &str)]) -> Prompt {
        Prompt {
            system: String::new(),
            documents: docs
                .iter()
                .map(|(label, text)| PromptDocument {
                    label: label.to_string(),
                    text: text.to_string(),
                })
                .collect(),
            question: question.to_string(),
        }
    }

    #[tokio::test]
    async fn test_picks_matching_sentence() {
        let p = prompt(
            "How many vacation days do employees get?",
            &[
                ("mission.txt", "We build tools. Our mission is quality."),
                (
                    "policy.txt",
                    "Offices open at nine. Employees get twenty vacation days per year.",
                ),
            ],
        );
        let raw = ExtractiveGenerator::new().generate(&p).await.unwrap();
        let (answer, confidence) = split_confidence(&raw);

        assert!(answer.starts_with("Employees get twenty vacation days per year. (policy.txt)"));
        assert!(confidence.unwrap() > 0.5);
    }

    #[tokio::test]
    async fn test_no_overlap_still_answers_with_zero_confidence() {
        let p = prompt("zebra migration", &[("a.txt", "Nothing related here.")]);
        let raw = ExtractiveGenerator::new().generate(&p).await.unwrap();
        let (answer, confidence) = split_confidence(&raw);
        assert_eq!(answer, "Nothing related here. (a.txt)");
        assert_eq!(confidence, Some(0.0));
    }

    #[tokio::test]
    async fn test_no_documents() {
        let p = prompt("anything", &[]);
        assert!(ExtractiveGenerator::new().generate(&p).await.is_err());
    }

    #[test]
    fn test_split_sentences() {
        let parts: Vec<_> = split_sentences("One. Two!\nThree? ...").collect();
        assert_eq!(parts, vec!["One.", "Two!", "Three?"]);
    }
}
