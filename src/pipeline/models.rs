//! Data models for pipeline runs, batches and skill results

use crate::context::{GenerationStrategy, SourceContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An extracted skill label. Order-significant, not deduplicated.
pub type Skill = String;

/// A skill tagged with its position in the submitted list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSkill {
    pub index: usize,
    pub skill: Skill,
}

/// Contiguous, order-preserving group of items processed together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    /// 1-based position among the run's top-level batches
    pub index: usize,
    /// Log label, e.g. `Batch 2/4` or `Batch 2/4-L-R` after splits
    pub label: String,
    /// Number of splits that produced this batch
    pub depth: u32,
    pub budget_tokens: usize,
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace the items, keeping position, label, depth and budget
    pub fn map_items<U>(self, f: impl FnOnce(Vec<T>) -> Vec<U>) -> Batch<U> {
        Batch {
            index: self.index,
            label: self.label,
            depth: self.depth,
            budget_tokens: self.budget_tokens,
            items: f(self.items),
        }
    }

    /// A split half one level deeper
    pub(crate) fn child(&self, suffix: &str, items: Vec<T>) -> Batch<T> {
        Batch {
            index: self.index,
            label: format!("{}-{}", self.label, suffix),
            depth: self.depth + 1,
            budget_tokens: self.budget_tokens,
            items,
        }
    }
}

/// One skill's input to the question-generation capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub skill: Skill,
    pub context: SourceContext,
    pub strategy: GenerationStrategy,
}

/// Questions returned by the generation capability for one skill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuestions {
    pub skill: Skill,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// A discovered skill waiting for generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSkill {
    pub index: usize,
    pub request: GenerationRequest,
}

impl PlannedSkill {
    /// Tokens this skill contributes to a generation call
    pub fn context_tokens(&self) -> usize {
        match self.request.strategy {
            GenerationStrategy::ContextBased => self.request.context.estimated_tokens(),
            GenerationStrategy::ContextFree => 0,
        }
    }
}

/// Per-skill lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillPhase {
    Pending,
    Discovering,
    ContextFound,
    NoContext,
    Generating,
    Completed,
    Failed,
}

/// Per-batch lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Pending,
    Discovering,
    Splitting { sub_batches: usize },
    Generating,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    Success,
    Failed,
}

/// Terminal, immutable outcome for one input skill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillResult {
    pub index: usize,
    pub skill: Skill,
    pub questions: Vec<String>,
    pub strategy_used: GenerationStrategy,
    pub status: SkillStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SkillResult {
    pub fn success(
        index: usize,
        skill: Skill,
        questions: Vec<String>,
        strategy_used: GenerationStrategy,
    ) -> Self {
        Self {
            index,
            skill,
            questions,
            strategy_used,
            status: SkillStatus::Success,
            error: None,
        }
    }

    pub fn failed(
        index: usize,
        skill: Skill,
        strategy_used: GenerationStrategy,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            index,
            skill,
            questions: Vec::new(),
            strategy_used,
            status: SkillStatus::Failed,
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SkillStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
    Success,
    Partial,
    Failure,
}

/// Completion record for one top-level batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub index: usize,
    pub label: String,
    pub total_skills: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcome: BatchOutcome,
}

impl BatchSummary {
    pub fn new(index: usize, label: String, succeeded: usize, failed: usize) -> Self {
        let total_skills = succeeded + failed;
        let outcome = if total_skills > 0 && succeeded == total_skills {
            BatchOutcome::Success
        } else if succeeded > 0 {
            BatchOutcome::Partial
        } else {
            BatchOutcome::Failure
        };
        Self {
            index,
            label,
            total_skills,
            succeeded,
            failed,
            outcome,
        }
    }
}

/// Payload of the completion sentinel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub total_skills: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub degraded_services: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(strategy: GenerationStrategy, tokens: usize) -> PlannedSkill {
        PlannedSkill {
            index: 0,
            request: GenerationRequest {
                skill: "Rust".to_string(),
                context: SourceContext::found("content", tokens),
                strategy,
            },
        }
    }

    #[test]
    fn test_context_free_skill_costs_no_tokens() {
        assert_eq!(planned(GenerationStrategy::ContextBased, 120).context_tokens(), 120);
        assert_eq!(planned(GenerationStrategy::ContextFree, 120).context_tokens(), 0);
    }

    #[test]
    fn test_batch_child_increments_depth() {
        let batch = Batch {
            index: 2,
            label: "Batch 2/4".to_string(),
            depth: 0,
            budget_tokens: 100,
            items: vec![1, 2, 3],
        };
        let child = batch.child("L", vec![1, 2]);
        assert_eq!(child.depth, 1);
        assert_eq!(child.label, "Batch 2/4-L");
        assert_eq!(child.index, 2);
        assert_eq!(child.budget_tokens, 100);
    }

    #[test]
    fn test_batch_summary_outcome() {
        let label = || "Batch 1/1".to_string();
        assert_eq!(BatchSummary::new(1, label(), 3, 0).outcome, BatchOutcome::Success);
        assert_eq!(BatchSummary::new(1, label(), 1, 2).outcome, BatchOutcome::Partial);
        assert_eq!(BatchSummary::new(1, label(), 0, 3).outcome, BatchOutcome::Failure);
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(serde_json::to_value(SkillPhase::Pending).unwrap(), "pending");
        assert_eq!(serde_json::to_value(SkillPhase::Generating).unwrap(), "generating");
        assert_eq!(serde_json::to_value(BatchPhase::Pending).unwrap(), "pending");
        assert_eq!(
            serde_json::to_value(BatchPhase::Splitting { sub_batches: 2 }).unwrap(),
            serde_json::json!({"splitting": {"sub_batches": 2}})
        );
    }

    #[test]
    fn test_run_summary_duration() {
        let started_at = Utc::now();
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            total_skills: 3,
            succeeded: 2,
            failed: 1,
            cancelled: false,
            degraded_services: Vec::new(),
            started_at,
            finished_at: started_at + chrono::Duration::milliseconds(1500),
        };
        assert_eq!(summary.duration_ms(), 1500);
    }

    #[test]
    fn test_skill_result_serialization() {
        let result = SkillResult::failed(
            4,
            "Kafka".to_string(),
            GenerationStrategy::ContextFree,
            "no questions generated",
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["strategy_used"], "context_free");
        assert_eq!(json["error"], "no questions generated");

        let ok = SkillResult::success(
            0,
            "Rust".to_string(),
            vec!["Q1".to_string()],
            GenerationStrategy::ContextBased,
        );
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());
    }
}
