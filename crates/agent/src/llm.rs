//! Chat-completion client shared by the signal extractor and the response composer.
//!
//! One OpenAI-compatible implementation covers both hosted OpenAI and a local Ollama
//! endpoint. When no provider is configured the disabled client fails every call, which
//! routes each turn through the deterministic fallbacks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use carepath_core::config::{LlmConfig, LlmProvider};
use carepath_core::domain::tool::ToolCall;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// A function the generative collaborator may request.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Text and tool requests returned by a tool-enabled completion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Completion constrained to a single JSON object.
    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Completion that may answer with text, tool calls, or both.
    async fn chat_with_tools(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatReply>;

    fn model_name(&self) -> &str;

    fn provider_name(&self) -> &str;
}

/// Builds the client selected by configuration.
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider {
        LlmProvider::Disabled => Ok(Arc::new(DisabledLlmClient)),
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            Ok(Arc::new(OpenAiCompatibleClient::from_config(config)?))
        }
    }
}

/// Client for any endpoint speaking the `/chat/completions` protocol.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    api_key: Option<SecretString>,
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    provider: &'static str,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let base_url = match (config.provider, config.base_url.as_deref()) {
            (_, Some(base)) => base.to_string(),
            (LlmProvider::OpenAi, None) => OPENAI_BASE_URL.to_string(),
            (provider, None) => {
                return Err(anyhow!("llm provider `{}` requires a base_url", provider.as_str()))
            }
        };
        if config.provider == LlmProvider::OpenAi && config.api_key.is_none() {
            return Err(anyhow!("llm provider `openai` requires an api_key"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            api_key: config.api_key.clone(),
            client,
            endpoint: completions_endpoint(config.provider, &base_url),
            model: config.model.clone(),
            temperature: config.temperature,
            provider: config.provider.as_str(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, body: &Value) -> Result<String> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key.expose_secret()));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} API error {}: {}", self.provider, status, body));
        }

        let response_text = response.text().await?;
        tracing::debug!(
            provider = self.provider,
            model = %self.model,
            "llm raw response: {}",
            &response_text[..floor_char_boundary(&response_text, 1000)]
        );
        Ok(response_text)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": self.temperature,
            "response_format": {"type": "json_object"}
        });

        let response_text = self.post(&body).await?;
        parse_content(&response_text)
    }

    async fn chat_with_tools(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatReply> {
        let tools: Vec<Value> = tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": &tool.name,
                        "description": &tool.description,
                        "parameters": &tool.parameters
                    }
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": self.temperature,
            "tools": tools,
            "tool_choice": "auto"
        });

        let response_text = self.post(&body).await?;
        parse_tool_reply(&response_text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        self.provider
    }
}

/// Stand-in used when no provider is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledLlmClient;

#[async_trait]
impl LlmClient for DisabledLlmClient {
    async fn chat_json(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        Err(anyhow!("llm provider is disabled"))
    }

    async fn chat_with_tools(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _tools: &[ToolDefinition],
    ) -> Result<ChatReply> {
        Err(anyhow!("llm provider is disabled"))
    }

    fn model_name(&self) -> &str {
        "none"
    }

    fn provider_name(&self) -> &str {
        LlmProvider::Disabled.as_str()
    }
}

fn completions_endpoint(provider: LlmProvider, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    // Ollama serves the OpenAI-compatible API under /v1.
    if provider == LlmProvider::Ollama && !base.ends_with("/v1") {
        format!("{base}/v1/chat/completions")
    } else {
        format!("{base}/chat/completions")
    }
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    (0..=max).rev().find(|index| text.is_char_boundary(*index)).unwrap_or(0)
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ToolCallEntry {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallEntry>>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

fn first_message(response_text: &str) -> Result<Message> {
    let api_response: ApiResponse = serde_json::from_str(response_text)
        .map_err(|error| anyhow!("failed to parse completion response: {}", error))?;
    api_response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| anyhow!("completion returned no choices"))
}

fn parse_content(response_text: &str) -> Result<String> {
    first_message(response_text)?
        .content
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| anyhow!("completion returned no content"))
}

fn parse_tool_reply(response_text: &str) -> Result<ChatReply> {
    let message = first_message(response_text)?;
    let mut tool_calls = Vec::new();
    for entry in message.tool_calls.unwrap_or_default() {
        // Arguments arrive as a JSON-encoded string.
        let parameters = if entry.function.arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&entry.function.arguments).map_err(|error| {
                anyhow!("failed to parse arguments for `{}`: {}", entry.function.name, error)
            })?
        };
        tool_calls.push(ToolCall { name: entry.function.name, parameters });
    }

    Ok(ChatReply { text: message.content.unwrap_or_default().trim().to_string(), tool_calls })
}
