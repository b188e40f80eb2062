//! Token estimation strategies for discovered content

use crate::config::EstimatorKind;
use crate::error::{PipelineError, Result};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }
}

/// Build the estimator selected in configuration
pub fn build_estimator(kind: EstimatorKind) -> Result<Arc<dyn TokenEstimator>> {
    let estimator: Arc<dyn TokenEstimator> = match kind {
        EstimatorKind::Chars => Arc::new(CharRatioEstimator::default()),
        EstimatorKind::Words => Arc::new(WordBasedEstimator::default()),
        EstimatorKind::Tiktoken => Arc::new(TiktokenEstimator::new()?),
    };
    Ok(estimator)
}

/// Tiktoken-based token estimator using cl100k_base (GPT-4, GPT-3.5-turbo)
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Create a new tiktoken estimator with cl100k_base encoding
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base()
            .map_err(|e| PipelineError::Provider(format!("tiktoken init failed: {}", e)))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Character-ratio estimator (~4 characters per token)
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_token
    }
}

/// Word-based token estimator (~1.3 tokens per word)
pub struct WordBasedEstimator {
    tokens_per_word: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn estimate(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktoken_estimator() {
        let estimator = TiktokenEstimator::new().unwrap();
        let text = "Hello, world! This is a test.";
        let tokens = estimator.estimate(text);
        assert!(tokens > 0);
        assert!(tokens < 20);
    }

    #[test]
    fn test_char_ratio_estimator() {
        let estimator = CharRatioEstimator::default();
        assert_eq!(estimator.estimate("abcdefgh"), 2);
        assert_eq!(estimator.estimate("abc"), 0);
    }

    #[test]
    fn test_word_based_estimator() {
        let estimator = WordBasedEstimator::default();
        assert_eq!(estimator.estimate("Hello world test"), 4); // 3 * 1.3 = 3.9 -> 4
    }

    #[test]
    fn test_batch_estimation() {
        let estimator = CharRatioEstimator::new(1);
        let tokens = estimator.estimate_batch(&["a", "bb", "ccc"]);
        assert_eq!(tokens, vec![1, 2, 3]);
    }

    #[test]
    fn test_build_estimator_by_kind() {
        let words = build_estimator(EstimatorKind::Words).unwrap();
        assert_eq!(words.estimate("one two"), 3);

        let chars = build_estimator(EstimatorKind::Chars).unwrap();
        assert_eq!(chars.estimate("abcdefgh"), 2);
    }
}
