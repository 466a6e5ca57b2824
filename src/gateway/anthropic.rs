use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::prompt::{self, PreparedPrompt};
use super::sse::{reply_stream, Frame, SseEvent};
use super::{AgentGateway, GatewayError, ReplyRequest, ReplyStream};
use crate::database::{AgentProfile, Role};

const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Streaming client for the Anthropic Messages API
pub struct AnthropicGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl AnthropicGateway {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    fn model(agent: &AgentProfile) -> &str {
        match agent.llm_model.trim() {
            "" => DEFAULT_MODEL,
            model => model,
        }
    }

    fn body<'a>(agent: &'a AgentProfile, prompt: &'a PreparedPrompt) -> MessagesRequest<'a> {
        MessagesRequest {
            model: Self::model(agent),
            system: prompt.system.as_deref(),
            messages: prompt
                .turns
                .iter()
                .filter(|turn| turn.role != Role::System)
                .map(|turn| Message {
                    role: turn.role.as_str(),
                    content: &turn.content,
                })
                .collect(),
            max_tokens: agent.max_tokens,
            temperature: agent.temperature,
            stream: true,
        }
    }
}

fn parse_event(event: &SseEvent) -> Result<Frame, GatewayError> {
    if event.event.as_deref() == Some("ping") {
        return Ok(Frame::Skip);
    }
    let parsed: StreamEvent =
        serde_json::from_str(&event.data).map_err(|e| GatewayError::Decode(e.to_string()))?;
    Ok(match parsed {
        StreamEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        } if !text.is_empty() => Frame::Text(text),
        StreamEvent::MessageStop => Frame::Done,
        StreamEvent::Error { error } => {
            return Err(GatewayError::Upstream {
                status: if error.kind == "overloaded_error" { 529 } else { 500 },
                body: error.message,
            })
        }
        _ => Frame::Skip,
    })
}

#[async_trait]
impl AgentGateway for AnthropicGateway {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn stream_reply(&self, request: ReplyRequest) -> Result<ReplyStream, GatewayError> {
        let prompt = prompt::prepare(&request);
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&Self::body(&request.agent, &prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(agent_id = %request.agent.id, status = status.as_u16(), "Anthropic request failed");
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(reply_stream(response.bytes_stream(), parse_event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ChatTurn;
    use futures_util::StreamExt;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ReplyRequest {
        ReplyRequest {
            agent: AgentProfile::new(Uuid::new_v4(), "Finance", "finance"),
            history: vec![ChatTurn::new(Role::User, "before")],
            message: "Hello".into(),
        }
    }

    #[tokio::test]
    async fn streams_text_deltas_until_stop() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: ping\ndata: {\"type\":\"ping\"}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "key"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-3-sonnet",
                "stream": true,
                "messages": [
                    {"role": "user", "content": "before"},
                    {"role": "user", "content": "Hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let gateway = AnthropicGateway::new(reqwest::Client::new(), &server.uri(), "key");
        let chunks: Vec<String> = gateway
            .stream_reply(request())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, ["Hel", "lo"]);
    }

    #[tokio::test]
    async fn error_event_stops_stream() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let gateway = AnthropicGateway::new(reqwest::Client::new(), &server.uri(), "key");
        let items: Vec<_> = gateway.stream_reply(request()).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(
            &items[1],
            Err(GatewayError::Upstream { status: 529, body }) if body == "Overloaded"
        ));
    }
}
