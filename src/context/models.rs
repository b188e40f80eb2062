//! Data models for discovered skill context

use super::token_estimator::TokenEstimator;
use serde::{Deserialize, Serialize};

/// Source material discovered for one skill.
///
/// Produced once per skill per run. `estimated_tokens` is whatever the
/// discovery capability reported and is treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceContext {
    Found {
        content: String,
        estimated_tokens: usize,
    },
    NotFound,
}

impl SourceContext {
    pub fn found(content: impl Into<String>, estimated_tokens: usize) -> Self {
        Self::Found {
            content: content.into(),
            estimated_tokens,
        }
    }

    /// Build a context whose token count comes from the given estimator.
    /// Blank content yields `NotFound`.
    pub fn estimated(content: impl Into<String>, estimator: &dyn TokenEstimator) -> Self {
        let content = content.into();
        if content.trim().is_empty() {
            return Self::NotFound;
        }
        let estimated_tokens = estimator.estimate(&content);
        Self::Found {
            content,
            estimated_tokens,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    /// Reported token count, zero when nothing was found
    pub fn estimated_tokens(&self) -> usize {
        match self {
            Self::Found {
                estimated_tokens, ..
            } => *estimated_tokens,
            Self::NotFound => 0,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Found { content, .. } => Some(content),
            Self::NotFound => None,
        }
    }

    /// Shrink the content so its estimate equals `budget`.
    ///
    /// Characters are kept in proportion to `budget / estimated_tokens`,
    /// cut on a char boundary. Contexts already within budget are unchanged.
    pub fn truncated_to(self, budget: usize) -> Self {
        match self {
            Self::Found {
                content,
                estimated_tokens,
            } if estimated_tokens > budget => {
                let total_chars = content.chars().count();
                let keep = ((total_chars as u128 * budget as u128) / estimated_tokens as u128)
                    as usize;
                let content: String = content.chars().take(keep).collect();
                Self::Found {
                    content,
                    estimated_tokens: budget,
                }
            }
            other => other,
        }
    }
}

/// How questions for a skill are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    /// Grounded in discovered source material
    ContextBased,
    /// Conceptual questions without source material
    ContextFree,
}

impl GenerationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContextBased => "context_based",
            Self::ContextFree => "context_free",
        }
    }
}
