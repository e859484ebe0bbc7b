//! Vertex AI `generateContent` client for `gemini-2.5-flash`.

use crate::adapters::gcp_auth::{ServiceAccountTokenProvider, TokenProvider};
use crate::domain::ports::ConditionExtractor;
use crate::utils::error::{PipelineError, Result};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

pub const MODEL_ID: &str = "gemini-2.5-flash";

static FENCED_ARRAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\[.*?\])\s*```").expect("valid fenced block regex")
});

/// Exponential backoff with jitter for model calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

/// Run `op`, retrying transient failures (see [`PipelineError::is_retryable`]).
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    op.retry(policy.backoff())
        .sleep(tokio::time::sleep)
        .when(|e: &PipelineError| e.is_retryable())
        .notify(|e: &PipelineError, delay: Duration| {
            tracing::warn!("⏳ Model call failed ({}), retrying in {:?}", e, delay);
        })
        .await
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

pub struct VertexClient {
    endpoint: String,
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

impl VertexClient {
    /// Validates the service account key before anything is sent.
    pub fn new(
        project: &str,
        location: &str,
        credentials_path: &str,
        base_url: Option<&str>,
    ) -> Result<Self> {
        tracing::info!("🤖 Initializing Vertex AI client ({} / {})", project, location);
        let tokens = ServiceAccountTokenProvider::from_file(credentials_path)?;
        tracing::debug!("Using service account {}", tokens.client_email());
        Ok(Self::with_token_provider(
            Self::endpoint_for(base_url, project, location),
            Arc::new(tokens),
        ))
    }

    pub fn with_token_provider(endpoint: String, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
            tokens,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint_for(base_url: Option<&str>, project: &str, location: &str) -> String {
        let base = match base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com", location),
        };
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            base, project, location, MODEL_ID
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `prompt` and return the concatenated text of the first candidate.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        with_retry(&self.retry, move || self.generate_once(prompt)).await
    }

    async fn generate_once(&self, prompt: &str) -> Result<String> {
        let token = self.tokens.access_token().await?;
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![TextPart { text: prompt }],
            }],
        };

        tracing::debug!("POST {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiErrorBody>(&raw) {
                Ok(parsed) if !parsed.error.status.is_empty() => {
                    format!("{}: {}", parsed.error.status, parsed.error.message)
                }
                Ok(parsed) => parsed.error.message,
                Err(_) => format!("HTTP {}: {}", status, raw),
            };
            return Err(PipelineError::LlmError {
                status: Some(status.as_u16()),
                message,
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        Ok(parsed.text())
    }
}

#[async_trait]
impl ConditionExtractor for VertexClient {
    async fn extract_conditions(&self, section: &str) -> Result<Vec<String>> {
        let text = self.generate(&build_prompt(section)).await?;
        Ok(parse_condition_list(&text))
    }
}

pub fn build_prompt(section: &str) -> String {
    format!(
        "Extract medical conditions from the assessment/plan section below.\n\n\
         Return ONLY a valid JSON array of condition names. Do not include any explanations, markdown, or other text.\n\
         Example format: [\"Condition 1\", \"Condition 2\", \"Condition 3\"]\n\n\
         Assessment/Plan section:\n{}\n",
        section
    )
}

/// 依序嘗試：整段 JSON、```json 區塊、第一個成對的 [...]
fn parse_model_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    if let Some(block) = FENCED_ARRAY.captures(text).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str::<Value>(block.as_str()) {
            return Some(value);
        }
    }

    let start = text.find('[')?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + 1];
                    return serde_json::from_str::<Value>(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn item_to_condition(item: &Value) -> Option<String> {
    let text = match item {
        Value::Null | Value::Bool(false) => return None,
        Value::Bool(true) => "True".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) if n.as_f64() == Some(0.0) => return None,
        Value::Number(n) => n.to_string(),
        Value::Array(a) if a.is_empty() => return None,
        Value::Object(o) if o.is_empty() => return None,
        other => other.to_string(),
    };
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Condition names from a model response; empty when the response is not a JSON array.
pub fn parse_condition_list(response_text: &str) -> Vec<String> {
    let text = response_text.trim();
    match parse_model_json(text) {
        Some(Value::Array(items)) => {
            let conditions: Vec<String> = items.iter().filter_map(item_to_condition).collect();
            if conditions.is_empty() {
                tracing::warn!("LLM returned empty list of conditions");
            }
            conditions
        }
        Some(other) => {
            tracing::warn!(
                "LLM returned non-list JSON ({}); returning empty list",
                json_kind(&other)
            );
            Vec::new()
        }
        None => {
            tracing::warn!("Failed to parse LLM output as JSON");
            tracing::debug!(
                "LLM response text: {}",
                text.chars().take(500).collect::<String>()
            );
            Vec::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
