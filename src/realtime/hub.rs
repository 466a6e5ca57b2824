use std::collections::HashMap;

use serde::Serialize;

use super::connection::{ConversationId, UserId};
use super::events::ServerEvent;
use super::participants::ParticipantIndex;
use super::registry::ConnectionRegistry;

/// Process-wide realtime state shared by every connection task
#[derive(Default)]
pub struct RealtimeHub {
    connections: ConnectionRegistry,
    participants: ParticipantIndex,
}

/// Operator view of the realtime layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeStats {
    pub total_users_connected: usize,
    pub total_connections: usize,
    pub active_conversations: usize,
    pub connection_details: HashMap<UserId, usize>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn participants(&self) -> &ParticipantIndex {
        &self.participants
    }

    /// Send an event to every connection of one user.
    pub fn send_event(&self, user_id: UserId, event: &ServerEvent) -> usize {
        self.connections.send_to_user(user_id, &event.to_frame())
    }

    /// Fan an event out to a conversation, encoding it once.
    pub fn broadcast_event(
        &self,
        conversation_id: ConversationId,
        event: &ServerEvent,
        exclude: Option<UserId>,
    ) -> usize {
        let frame = event.to_frame();
        let delivered =
            self.participants
                .broadcast(&self.connections, conversation_id, &frame, exclude);
        tracing::trace!(
            conversation_id = %conversation_id,
            event = event.kind(),
            delivered,
            "broadcast"
        );
        delivered
    }

    pub fn stats(&self) -> RealtimeStats {
        let connection_details = self.connections.snapshot();
        RealtimeStats {
            total_users_connected: connection_details.len(),
            total_connections: connection_details.values().sum(),
            active_conversations: self.participants.conversation_count(),
            connection_details,
        }
    }
}
