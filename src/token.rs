use std::sync::Arc;

const SIMPLE_CHARS_PER_TOKEN: usize = 4;
const ENHANCED_WORD_MULTIPLIER: f64 = 1.3;
const ENHANCED_SPECIAL_DIVISOR: usize = 10;

/// Default ceiling for the completion length requested from the API.
pub(crate) const DEFAULT_MAX_COMPLETION_TOKENS: usize = 2_048;

/// Type of tokenizer to use for estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    /// Simple character-based tokenizer (~4 chars per token)
    Simple,
    /// Enhanced tokenizer with word and special character analysis
    Enhanced,
}

impl TokenizerKind {
    /// Creates a new tokenizer instance of this kind.
    #[must_use]
    pub fn create(self) -> Arc<dyn TokenEstimator> {
        match self {
            Self::Simple => Arc::new(SimpleTokenizer),
            Self::Enhanced => Arc::new(EnhancedTokenizer),
        }
    }
}

/// Estimates token counts of prompt text.
pub trait TokenEstimator: Send + Sync {
    /// Estimates the number of tokens in the given text.
    fn estimate(&self, text: &str) -> usize;

    /// Estimates the combined size of several prompt parts.
    fn estimate_all(&self, parts: &[&str]) -> usize {
        parts.iter().map(|p| self.estimate(p)).sum()
    }
}

/// Character-based tokenizer, about 4 characters per token.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SimpleTokenizer;

impl TokenEstimator for SimpleTokenizer {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        text.chars()
            .count()
            .saturating_add(SIMPLE_CHARS_PER_TOKEN - 1)
            .saturating_div(SIMPLE_CHARS_PER_TOKEN)
            .max(1)
    }
}

/// Blends word count, character count and punctuation density.
///
/// Prompts mix prose with JSON examples, so punctuation gets a small
/// penalty on top of the averaged word and character estimates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EnhancedTokenizer;

impl TokenEstimator for EnhancedTokenizer {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let words = text.split_whitespace().count();
        let chars = text.chars().count();
        let special_chars = text
            .chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
            .count();

        let word_estimate = (words as f64 * ENHANCED_WORD_MULTIPLIER) as usize;
        let char_estimate = chars.saturating_div(SIMPLE_CHARS_PER_TOKEN);
        let special_penalty = special_chars.saturating_div(ENHANCED_SPECIAL_DIVISOR);

        word_estimate
            .saturating_add(char_estimate)
            .saturating_div(2)
            .saturating_add(special_penalty)
            .max(1)
    }
}

/// Completion length to request for a prompt of `prompt_tokens`.
///
/// The answer may be as long as the input and the model needs room for the
/// input itself, so the budget is twice the prompt, capped at `cap`.
#[must_use]
pub fn completion_budget(prompt_tokens: usize, cap: usize) -> usize {
    prompt_tokens.saturating_mul(2).min(cap).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_tokenizer_empty() {
        assert_eq!(SimpleTokenizer.estimate(""), 0);
    }

    #[test]
    fn test_simple_tokenizer_basic() {
        let tokenizer = SimpleTokenizer;
        assert_eq!(tokenizer.estimate("test"), 1);
        assert_eq!(tokenizer.estimate("hello world"), 3);
        assert_eq!(tokenizer.estimate(&"a".repeat(1000)), 250);
    }

    #[test]
    fn test_enhanced_tokenizer_prompt() {
        let tokenizer = EnhancedTokenizer;
        let prompt = "list all the classes declared in:\n\n'Payment service'\n\n[\"x\", \"y\"]";
        let result = tokenizer.estimate(prompt);
        assert!(result > 5);
        assert!(result < 40);
    }

    #[test]
    fn test_estimate_all_sums_parts() {
        let tokenizer = SimpleTokenizer;
        assert_eq!(tokenizer.estimate_all(&["test", "hello world", ""]), 4);
    }

    #[test]
    fn test_kind_creates_matching_estimator() {
        let simple = TokenizerKind::Simple.create();
        assert_eq!(simple.estimate("abcdefgh"), 2);

        let enhanced = TokenizerKind::Enhanced.create();
        assert!(enhanced.estimate("abcdefgh") > 0);
    }

    #[test]
    fn test_completion_budget_doubles_prompt() {
        assert_eq!(completion_budget(300, DEFAULT_MAX_COMPLETION_TOKENS), 600);
    }

    #[test]
    fn test_completion_budget_is_capped() {
        assert_eq!(completion_budget(5_000, 2_048), 2_048);
        assert_eq!(completion_budget(usize::MAX, 4_096), 4_096);
    }

    #[test]
    fn test_completion_budget_never_zero() {
        assert_eq!(completion_budget(0, 2_048), 1);
    }
}
