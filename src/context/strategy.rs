//! Per-skill choice between context-based and context-free generation

use super::models::{GenerationStrategy, SourceContext};

/// Picks the generation strategy for a skill from its discovered context
#[derive(Debug, Clone, Copy)]
pub struct ContextStrategySelector {
    min_context_chars: usize,
}

impl ContextStrategySelector {
    pub fn new(min_context_chars: usize) -> Self {
        Self { min_context_chars }
    }

    /// `discovery_degraded` is whether discovery was already degraded when
    /// this skill would have been discovered, not its current state.
    pub fn select(&self, context: &SourceContext, discovery_degraded: bool) -> GenerationStrategy {
        if discovery_degraded {
            return GenerationStrategy::ContextFree;
        }

        match context.content() {
            Some(content) if content.trim().chars().count() >= self.min_context_chars => {
                GenerationStrategy::ContextBased
            }
            _ => GenerationStrategy::ContextFree,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_found_context_is_context_based() {
        let selector = ContextStrategySelector::new(10);
        let context = SourceContext::found("Ownership and borrowing in depth", 8);
        assert_eq!(selector.select(&context, false), GenerationStrategy::ContextBased);
    }

    #[test]
    fn test_not_found_is_context_free() {
        let selector = ContextStrategySelector::new(10);
        assert_eq!(
            selector.select(&SourceContext::NotFound, false),
            GenerationStrategy::ContextFree
        );
    }

    #[test]
    fn test_degraded_discovery_is_context_free() {
        let selector = ContextStrategySelector::new(10);
        let context = SourceContext::found("Ownership and borrowing in depth", 8);
        assert_eq!(selector.select(&context, true), GenerationStrategy::ContextFree);
    }

    #[test]
    fn test_short_content_is_context_free() {
        let selector = ContextStrategySelector::new(10);
        let context = SourceContext::found("   tiny    ", 1);
        assert_eq!(selector.select(&context, false), GenerationStrategy::ContextFree);
    }

    #[test]
    fn test_selection_is_idempotent() {
        let selector = ContextStrategySelector::new(5);
        let context = SourceContext::found("enough content", 3);
        let first = selector.select(&context, false);
        assert_eq!(selector.select(&context, false), first);
    }
}
