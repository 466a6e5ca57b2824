use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::prompt::{self, PreparedPrompt};
use super::sse::{reply_stream, Frame, SseEvent};
use super::{AgentGateway, GatewayError, ReplyRequest, ReplyStream};
use crate::database::AgentProfile;

const DEFAULT_MODEL: &str = "gpt-4";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Streaming client for OpenAI-compatible `chat/completions` endpoints
pub struct OpenAiGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiGateway {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    fn model(agent: &AgentProfile) -> &str {
        let model = agent.llm_model.trim();
        if model.is_empty() {
            DEFAULT_MODEL
        } else {
            model
        }
    }

    fn body<'a>(agent: &'a AgentProfile, prompt: &'a PreparedPrompt) -> ChatCompletionRequest<'a> {
        let mut messages = Vec::with_capacity(prompt.turns.len() + 1);
        if let Some(system) = prompt.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.extend(prompt.turns.iter().map(|turn| ChatMessage {
            role: turn.role.as_str(),
            content: &turn.content,
        }));
        ChatCompletionRequest {
            model: Self::model(agent),
            messages,
            max_tokens: agent.max_tokens,
            temperature: agent.temperature,
            stream: true,
        }
    }
}

fn parse_event(event: &SseEvent) -> Result<Frame, GatewayError> {
    let data = event.data.trim();
    if data == "[DONE]" {
        return Ok(Frame::Done);
    }
    let chunk: CompletionChunk =
        serde_json::from_str(data).map_err(|e| GatewayError::Decode(e.to_string()))?;
    if let Some(error) = chunk.error {
        return Err(GatewayError::Upstream {
            status: 200,
            body: error.to_string(),
        });
    }
    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(text) if !text.is_empty() => Ok(Frame::Text(text)),
        _ => Ok(Frame::Skip),
    }
}

#[async_trait]
impl AgentGateway for OpenAiGateway {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream_reply(&self, request: ReplyRequest) -> Result<ReplyStream, GatewayError> {
        let prompt = prompt::prepare(&request);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Self::body(&request.agent, &prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(agent_id = %request.agent.id, status = status.as_u16(), "OpenAI request failed");
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(reply_stream(response.bytes_stream(), parse_event))
    }
}
