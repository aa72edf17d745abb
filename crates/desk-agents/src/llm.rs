//! OpenAI-compatible chat completion client.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use deliberation::{CollaboratorError, ContextRefs, ReasoningCall};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::LlmSettings;

const SYSTEM_PROMPT: &str = "You are a member of a trading desk. Answer in plain prose, \
be specific about the subject and date you are given, and never invent data you were not shown.";

/// One model behind a `/chat/completions` endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    /// Fails when the HTTP client cannot be built; the timeout is never dropped.
    pub fn new(
        settings: &LlmSettings,
        model: &str,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .with_context(|| format!("Failed to build HTTP client for model {}", model))?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", settings.url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: settings.api_key.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn request_body(&self, prompt: &str, context: &ContextRefs) -> Value {
        let mut system = SYSTEM_PROMPT.to_string();
        if !context.is_empty() {
            system.push_str("\n\nContext:");
            for (key, value) in context {
                system.push_str(&format!("\n- {}: {}", key, value));
            }
        }
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature
        })
    }
}

/// Pull the assistant text out of a chat completion response.
pub fn parse_completion(body: &Value) -> Result<String, CollaboratorError> {
    if let Some(message) = body["error"]["message"].as_str() {
        return Err(CollaboratorError::RequestFailed(message.to_string()));
    }
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| CollaboratorError::ParseError("no choices[0].message.content".into()))
}

#[async_trait]
impl ReasoningCall for ChatClient {
    async fn complete(
        &self,
        prompt: &str,
        context: &ContextRefs,
    ) -> Result<String, CollaboratorError> {
        let start = Instant::now();
        let mut request = self.http.post(&self.endpoint).json(&self.request_body(prompt, context));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CollaboratorError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(CollaboratorError::Unavailable(format!(
                "{} rejected credentials ({})",
                self.endpoint, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::RequestFailed(format!(
                "chat API error ({}): {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CollaboratorError::ParseError(e.to_string()))?;
        let text = parse_completion(&body)?;
        debug!(model = %self.model, chars = text.len(), elapsed_ms = start.elapsed().as_millis() as u64, "completion received");
        Ok(text)
    }
}
