//! External capabilities the pipeline orchestrates
//!
//! The orchestrator only sees these two traits. `chat` provides
//! implementations backed by an OpenAI-compatible chat completion API.

pub mod chat;

use crate::context::SourceContext;
use crate::pipeline::models::{GeneratedQuestions, GenerationRequest};
use crate::resilience::ServiceError;
use async_trait::async_trait;

pub use chat::{ChatClient, ChatDiscoverer, ChatGenerator};

/// Finds source material for a skill
#[async_trait]
pub trait SourceDiscoverer: Send + Sync {
    async fn discover_sources(&self, skill: &str) -> Result<SourceContext, ServiceError>;
}

/// Generates interview questions for a group of skills in one call.
///
/// Implementations may return fewer entries than requested or reorder them;
/// the orchestrator reconciles the response against the request.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate_questions(
        &self,
        requests: &[GenerationRequest],
    ) -> Result<Vec<GeneratedQuestions>, ServiceError>;
}
