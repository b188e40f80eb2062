//! OpenAI-compatible chat completion providers

use super::{QuestionGenerator, SourceDiscoverer};
use crate::config::ProviderConfig;
use crate::context::{GenerationStrategy, SourceContext, TokenEstimator};
use crate::error::{PipelineError, Result};
use crate::pipeline::models::{GeneratedQuestions, GenerationRequest};
use crate::resilience::{ErrorCode, ServiceError};
use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Marker the discovery model returns when it has nothing useful
const NOT_FOUND_MARKER: &str = "NOT_FOUND";

const DISCOVERY_SYSTEM_PROMPT: &str = "You are a technical researcher preparing material for expert \
interviewers. Extract dense, technical content: trade-offs, common misconceptions, design patterns \
and failure modes. Plain text only.";

const GENERATION_SYSTEM_PROMPT: &str = "You are a senior technical interviewer. Respond with JSON only, \
shaped as {\"all_questions\": [{\"skill\": string, \"questions\": [string]}]}, with one entry for \
every requested skill using the skill name exactly as given.";

/// Thin client for one chat completion endpoint
pub struct ChatClient {
    http: Client,
    config: ProviderConfig,
    api_key: Option<SecretString>,
}

impl ChatClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| PipelineError::Provider(e.to_string()))?;
        let api_key = config.resolve_api_key();

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    /// Send one system + user exchange and return the first choice's text
    pub async fn complete(
        &self,
        system: &str,
        user: String,
    ) -> std::result::Result<String, ServiceError> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        };

        let mut req = self.http.post(&self.config.endpoint).json(&request);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req.send().await.map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, retry_after));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            ServiceError::new(
                ErrorCode::MalformedResponse,
                format!("failed to parse completion: {}", e),
            )
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::new(ErrorCode::MalformedResponse, "no choices in response"))
    }
}

fn map_transport_error(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() {
        ServiceError::new(ErrorCode::Timeout, error.to_string())
    } else if error.is_connect() || error.is_request() {
        ServiceError::new(ErrorCode::Unavailable, error.to_string())
    } else {
        ServiceError::new(ErrorCode::Unknown, error.to_string())
    }
}

/// Build a service error from a non-success response
fn status_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> ServiceError {
    let provider_code = provider_error_code(body);
    let code = ErrorCode::from_http_status(status.as_u16(), provider_code.as_deref());
    let snippet: String = body.chars().take(300).collect();

    let error = ServiceError::new(code, format!("HTTP {}: {}", status, snippet));
    match retry_after {
        Some(delay) => error.with_retry_after(delay),
        None => error,
    }
}

/// Pull `error.code` (or `error.status` / `error.type`) out of a JSON error body
fn provider_error_code(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    ["code", "status", "type"].iter().find_map(|key| match error.get(*key)? {
        serde_json::Value::String(code) => Some(code.clone()),
        _ => None,
    })
}

/// Strip markdown code fences and any prose around the JSON object
pub(crate) fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Source discovery through a chat model
pub struct ChatDiscoverer {
    client: ChatClient,
    estimator: Arc<dyn TokenEstimator>,
}

impl ChatDiscoverer {
    pub fn new(config: ProviderConfig, estimator: Arc<dyn TokenEstimator>) -> Result<Self> {
        Ok(Self {
            client: ChatClient::new(config)?,
            estimator,
        })
    }
}

#[async_trait]
impl SourceDiscoverer for ChatDiscoverer {
    async fn discover_sources(
        &self,
        skill: &str,
    ) -> std::result::Result<SourceContext, ServiceError> {
        let prompt = format!(
            "Skill: {}\n\nSummarise the most important technical material an interviewer should \
             know about this skill. If you have no reliable material, answer exactly {}.",
            skill, NOT_FOUND_MARKER
        );

        let content = self.client.complete(DISCOVERY_SYSTEM_PROMPT, prompt).await?;
        let trimmed = content.trim();
        if trimmed.is_empty() || trimmed == NOT_FOUND_MARKER {
            debug!("No sources found for '{}'", skill);
            return Ok(SourceContext::NotFound);
        }

        Ok(SourceContext::estimated(trimmed, self.estimator.as_ref()))
    }
}

/// Question generation through a chat model
pub struct ChatGenerator {
    client: ChatClient,
}

impl ChatGenerator {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: ChatClient::new(config)?,
        })
    }

    fn build_prompt(requests: &[GenerationRequest]) -> String {
        let mut prompt = String::from("Generate interview questions for each skill below.\n");
        for request in requests {
            let _ = write!(prompt, "\n## Skill: {}\n", request.skill);
            match (request.strategy, request.context.content()) {
                (GenerationStrategy::ContextBased, Some(content)) => {
                    let _ = write!(
                        prompt,
                        "Ground the questions in this source material:\n{}\n",
                        content
                    );
                }
                _ => {
                    prompt.push_str(
                        "No source material. Ask conceptual questions about fundamentals and trade-offs.\n",
                    );
                }
            }
        }
        prompt
    }
}

#[async_trait]
impl QuestionGenerator for ChatGenerator {
    async fn generate_questions(
        &self,
        requests: &[GenerationRequest],
    ) -> std::result::Result<Vec<GeneratedQuestions>, ServiceError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let raw = self
            .client
            .complete(GENERATION_SYSTEM_PROMPT, Self::build_prompt(requests))
            .await?;

        let parsed: GenerationResponse = serde_json::from_str(extract_json(&raw)).map_err(|e| {
            let snippet: String = raw.chars().take(200).collect();
            ServiceError::new(
                ErrorCode::MalformedResponse,
                format!("invalid generation JSON ({}): {}", e, snippet),
            )
        })?;

        debug!(
            "Generation returned {} entries for {} skills",
            parsed.all_questions.len(),
            requests.len()
        );
        Ok(parsed.all_questions)
    }
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    all_questions: Vec<GeneratedQuestions>,
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
