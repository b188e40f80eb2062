//! Batch orchestration from skills to streamed question sets

pub mod batcher;
pub mod events;
pub mod models;
pub mod orchestrator;

pub use batcher::Batcher;
pub use events::{BatchStatus, EventPublisher, EventStream, EventStreamClosed, PipelineEvent};
pub use models::{
    Batch, BatchOutcome, BatchPhase, BatchSummary, GeneratedQuestions, GenerationRequest,
    IndexedSkill, PlannedSkill, RunSummary, Skill, SkillPhase, SkillResult, SkillStatus,
};
pub use orchestrator::{PipelineOrchestrator, PipelineRun};
