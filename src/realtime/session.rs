//! Per-connection message router.
//!
//! A [`ChatSession`] is bound to one open connection. Inbound frames are
//! handled one at a time to completion; every request is answered with a
//! confirmation, a broadcast, or an `error` event. Dropping the session
//! unregisters the connection exactly once, however the socket loop ends.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use uuid::Uuid;

use super::accumulator::StreamAccumulator;
use super::connection::{Connection, ConversationId, UserId};
use super::events::{self, ClientEvent, MessageView, ServerEvent};
use super::hub::RealtimeHub;
use crate::config::AppConfig;
use crate::database::{ChatStore, NewMessage, StoreError};
use crate::gateway::{AgentGateway, ChatTurn, GatewayError, ReplyRequest};

const FAILED_TO_SEND: &str = "Failed to send message";
const AGENT_NOT_FOUND: &str = "Agent not found";
const FAILED_TO_GENERATE: &str = "Failed to generate AI response";
pub const INTERNAL_ERROR: &str = "Internal server error";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub history_window: usize,
    /// Limit for the gateway to start streaming
    pub open_timeout: Duration,
    /// Limit between consecutive chunks
    pub chunk_timeout: Duration,
    pub auto_leave: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_window: 20,
            open_timeout: Duration::from_secs(60),
            chunk_timeout: Duration::from_secs(30),
            auto_leave: true,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_window: config.realtime.history_window,
            open_timeout: config.llm.request_timeout(),
            chunk_timeout: config.llm.chunk_timeout(),
            auto_leave: config.realtime.auto_leave_on_disconnect,
        }
    }
}

#[derive(Debug, Error)]
enum ReplyError {
    #[error("agent not found")]
    AgentNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub struct ChatSession {
    user_id: UserId,
    connection: Connection,
    hub: Arc<RealtimeHub>,
    store: Arc<dyn ChatStore>,
    gateway: Arc<dyn AgentGateway>,
    settings: SessionSettings,
}

impl ChatSession {
    /// Register `connection` with the hub and greet the client.
    pub fn open(
        connection: Connection,
        hub: Arc<RealtimeHub>,
        store: Arc<dyn ChatStore>,
        gateway: Arc<dyn AgentGateway>,
        settings: SessionSettings,
    ) -> Self {
        let user_id = connection.user_id();
        hub.connections().register(user_id, connection.clone());
        tracing::info!(
            user_id = %user_id,
            connection_id = %connection.id(),
            total_connections = hub.connections().connection_count(user_id),
            "WebSocket connection established"
        );

        let session = Self {
            user_id,
            connection,
            hub,
            store,
            gateway,
            settings,
        };
        session.reply(&ServerEvent::connected(user_id));
        session
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Send an event to this connection only.
    pub fn reply(&self, event: &ServerEvent) {
        self.connection.send(event.to_frame());
    }

    fn reply_error(&self, message: &str) {
        self.reply(&ServerEvent::error(message));
    }

    /// Report a failure that escaped event handling.
    pub fn report_internal_error(&self) {
        self.reply_error(INTERNAL_ERROR);
    }

    /// Decode and handle one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) {
        let event = match events::decode(text) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(user_id = %self.user_id, error = %err, "rejected inbound frame");
                self.reply_error(&err.to_string());
                return;
            }
        };
        tracing::debug!(user_id = %self.user_id, event_type = event.kind(), "inbound event");
        self.handle_event(event).await;
    }

    pub async fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::SendMessage {
                conversation_id,
                content,
                agent_id,
            } => self.send_message(conversation_id, content, agent_id).await,
            ClientEvent::JoinConversation { conversation_id } => {
                self.hub.participants().join(self.user_id, conversation_id);
                tracing::info!(user_id = %self.user_id, conversation_id = %conversation_id, "User joined conversation");
                self.reply(&ServerEvent::JoinedConversation { conversation_id });
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.hub.participants().leave(self.user_id, conversation_id);
                tracing::info!(user_id = %self.user_id, conversation_id = %conversation_id, "User left conversation");
                self.reply(&ServerEvent::LeftConversation { conversation_id });
            }
            ClientEvent::Typing {
                conversation_id,
                is_typing,
            } => {
                self.hub.broadcast_event(
                    conversation_id,
                    &ServerEvent::Typing {
                        user_id: self.user_id,
                        is_typing,
                        conversation_id,
                    },
                    Some(self.user_id),
                );
            }
        }
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: String,
        agent_id: Option<Uuid>,
    ) {
        let message = NewMessage::from_user(conversation_id, self.user_id, content.clone());
        let stored = match self.store.add_message(message).await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::error!(
                    user_id = %self.user_id,
                    conversation_id = %conversation_id,
                    error = %err,
                    "Error sending message"
                );
                self.reply_error(FAILED_TO_SEND);
                return;
            }
        };

        self.hub.broadcast_event(
            conversation_id,
            &ServerEvent::NewMessage {
                message: MessageView::from(&stored),
            },
            None,
        );

        let Some(agent_id) = agent_id else {
            return;
        };
        match self
            .generate_reply(conversation_id, agent_id, stored.id, content)
            .await
        {
            Ok(()) => {}
            Err(ReplyError::AgentNotFound) => self.reply_error(AGENT_NOT_FOUND),
            Err(err) => {
                tracing::error!(
                    user_id = %self.user_id,
                    conversation_id = %conversation_id,
                    agent_id = %agent_id,
                    error = %err,
                    "Error generating AI response"
                );
                self.reply_error(FAILED_TO_GENERATE);
            }
        }
    }

    /// Stream an agent reply to the conversation and persist it once complete.
    /// Partial output is discarded on any failure.
    async fn generate_reply(
        &self,
        conversation_id: ConversationId,
        agent_id: Uuid,
        user_message_id: Uuid,
        message: String,
    ) -> Result<(), ReplyError> {
        let agent = self
            .store
            .find_agent_for_conversation(conversation_id, agent_id)
            .await?
            .ok_or(ReplyError::AgentNotFound)?;

        let window = self.settings.history_window;
        let mut history: Vec<ChatTurn> = self
            .store
            .recent_messages(conversation_id, window + 1)
            .await?
            .into_iter()
            .filter(|m| m.id != user_message_id)
            .map(|m| ChatTurn::new(m.role, m.content))
            .collect();
        if history.len() > window {
            history.drain(..history.len() - window);
        }

        let request = ReplyRequest {
            agent,
            history,
            message,
        };
        let mut stream = tokio::time::timeout(
            self.settings.open_timeout,
            self.gateway.stream_reply(request),
        )
        .await
        .map_err(|_| GatewayError::Timeout)??;

        let mut accumulator = StreamAccumulator::new();
        loop {
            let next = tokio::time::timeout(self.settings.chunk_timeout, stream.next())
                .await
                .map_err(|_| GatewayError::Timeout)?;
            let chunk = match next {
                None => break,
                Some(chunk) => chunk?,
            };
            if chunk.is_empty() {
                continue;
            }
            accumulator.push(&chunk);
            self.hub.broadcast_event(
                conversation_id,
                &ServerEvent::MessageChunk {
                    chunk,
                    conversation_id,
                },
                None,
            );
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            agent_id = %agent_id,
            chunks = accumulator.chunk_count(),
            "agent reply complete"
        );
        let reply = NewMessage::from_agent(conversation_id, self.user_id, agent_id, accumulator.finish());
        let stored = self.store.add_message(reply).await?;
        self.hub.broadcast_event(
            conversation_id,
            &ServerEvent::MessageComplete {
                message: MessageView::from(&stored),
                conversation_id,
            },
            None,
        );
        Ok(())
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.connection.close();
        let participants = self.hub.participants();
        let auto_leave = self.settings.auto_leave;
        let user_id = self.user_id;
        let remaining =
            self.hub
                .connections()
                .unregister_with(user_id, self.connection.id(), || {
                    if !auto_leave {
                        return;
                    }
                    let left = participants.leave_all(user_id);
                    if left > 0 {
                        tracing::debug!(user_id = %user_id, conversations = left, "left conversations on disconnect");
                    }
                });
        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection.id(),
            remaining_connections = remaining,
            "WebSocket connection closed"
        );
    }
}
