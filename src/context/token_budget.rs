//! Token budget enforcement for generation batches
//!
//! A generation call carries the discovered context of every context-based
//! skill in its batch. When the summed estimate exceeds the batch budget the
//! batch is halved recursively until each piece fits. A single skill that is
//! still over budget has its context truncated instead.

use crate::context::GenerationStrategy;
use crate::metrics::METRICS;
use crate::pipeline::models::{Batch, PlannedSkill};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Share of the budget above which a fitting batch is logged as a warning
const DEFAULT_WARNING_RATIO: f64 = 0.8;

/// Token budget errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("Budget exceeded: {used} tokens used, {max} tokens allowed")]
    BudgetExceeded { used: usize, max: usize },
}

/// Recursive splitter for batches whose context exceeds the token budget
#[derive(Debug, Clone)]
pub struct TokenBudgetSplitter {
    warning_ratio: f64,
}

impl Default for TokenBudgetSplitter {
    fn default() -> Self {
        Self {
            warning_ratio: DEFAULT_WARNING_RATIO,
        }
    }
}

impl TokenBudgetSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summed context tokens of the context-based skills
    pub fn estimate(items: &[PlannedSkill]) -> usize {
        items.iter().map(PlannedSkill::context_tokens).sum()
    }

    /// Check if a batch fits within its budget
    pub fn check_budget(&self, batch: &Batch<PlannedSkill>) -> Result<usize, BudgetError> {
        let used = Self::estimate(&batch.items);
        if used > batch.budget_tokens {
            return Err(BudgetError::BudgetExceeded {
                used,
                max: batch.budget_tokens,
            });
        }
        Ok(used)
    }

    /// Split a batch into contiguous, order-preserving sub-batches that each fit.
    ///
    /// A batch already within budget comes back as the only element.
    pub fn split(&self, batch: Batch<PlannedSkill>) -> Vec<Batch<PlannedSkill>> {
        let mut out = Vec::new();
        self.split_into(batch, &mut out);
        out
    }

    fn split_into(&self, mut batch: Batch<PlannedSkill>, out: &mut Vec<Batch<PlannedSkill>>) {
        let estimate = Self::estimate(&batch.items);
        let budget = batch.budget_tokens;
        METRICS.record_batch_estimate(estimate);

        if estimate <= budget {
            if estimate as f64 > budget as f64 * self.warning_ratio {
                warn!(
                    "{}: context uses {} of {} budget tokens ({:.0}%)",
                    batch.label,
                    estimate,
                    budget,
                    estimate as f64 * 100.0 / budget as f64
                );
            } else {
                debug!("{}: {} tokens within budget {}", batch.label, estimate, budget);
            }
            out.push(batch);
            return;
        }

        if batch.items.len() <= 1 {
            warn!(
                "{}: single skill context of {} tokens exceeds budget {}, truncating",
                batch.label, estimate, budget
            );
            METRICS.record_truncation();
            out.push(batch.map_items(|items| {
                items
                    .into_iter()
                    .map(|mut skill| {
                        if skill.request.strategy == GenerationStrategy::ContextBased {
                            skill.request.context = skill.request.context.truncated_to(budget);
                        }
                        skill
                    })
                    .collect()
            }));
            return;
        }

        let mid = (batch.items.len() + 1) / 2;
        info!(
            "{}: {} tokens exceeds budget {}, splitting {} skills into {} + {}",
            batch.label,
            estimate,
            budget,
            batch.items.len(),
            mid,
            batch.items.len() - mid
        );
        METRICS.record_split();

        let right_items = batch.items.split_off(mid);
        let left_items = std::mem::take(&mut batch.items);
        let left = batch.child("L", left_items);
        let right = batch.child("R", right_items);

        self.split_into(left, out);
        self.split_into(right, out);
    }
}
