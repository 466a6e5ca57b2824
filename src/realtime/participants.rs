use std::collections::HashSet;

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;

use super::connection::{ConversationId, UserId};
use super::registry::ConnectionRegistry;

/// Tracks which users have joined each conversation on this process.
///
/// Participation is independent of database membership; it only records
/// joins issued over realtime connections.
#[derive(Default)]
pub struct ParticipantIndex {
    conversations: DashMap<ConversationId, HashSet<UserId>>,
}

impl ParticipantIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the user was not already a participant.
    pub fn join(&self, user_id: UserId, conversation_id: ConversationId) -> bool {
        self.conversations
            .entry(conversation_id)
            .or_default()
            .insert(user_id)
    }

    /// Returns `true` if the user was a participant. Empty conversations are
    /// dropped from the index.
    pub fn leave(&self, user_id: UserId, conversation_id: ConversationId) -> bool {
        let mut removed = false;
        self.conversations
            .remove_if_mut(&conversation_id, |_, users| {
                removed = users.remove(&user_id);
                users.is_empty()
            });
        removed
    }

    /// Remove a user from every conversation and return how many it left.
    pub fn leave_all(&self, user_id: UserId) -> usize {
        let mut count = 0;
        let mut emptied = Vec::new();

        for mut entry in self.conversations.iter_mut() {
            if entry.value_mut().remove(&user_id) {
                count += 1;
            }
            if entry.value().is_empty() {
                emptied.push(*entry.key());
            }
        }

        for conversation_id in emptied {
            self.conversations
                .remove_if(&conversation_id, |_, users| users.is_empty());
        }
        count
    }

    pub fn is_participant(&self, user_id: UserId, conversation_id: ConversationId) -> bool {
        self.conversations
            .get(&conversation_id)
            .is_some_and(|users| users.contains(&user_id))
    }

    pub fn participants(&self, conversation_id: ConversationId) -> Vec<UserId> {
        self.conversations
            .get(&conversation_id)
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of conversations with at least one participant
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Deliver `frame` to every participant except `exclude`, returning the
    /// number of connections that accepted it.
    ///
    /// The participant set is copied before sending so the conversation's
    /// shard is not held while touching the connection registry.
    pub fn broadcast(
        &self,
        registry: &ConnectionRegistry,
        conversation_id: ConversationId,
        frame: &Utf8Bytes,
        exclude: Option<UserId>,
    ) -> usize {
        self.participants(conversation_id)
            .into_iter()
            .filter(|user| Some(*user) != exclude)
            .map(|user| registry.send_to_user(user, frame))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn join_and_leave_prune_empty_sets() {
        let index = ParticipantIndex::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = Uuid::new_v4();

        assert!(index.join(a, conv));
        assert!(!index.join(a, conv));
        assert!(index.join(b, conv));
        assert!(index.leave(a, conv));
        assert_eq!(index.participants(conv), vec![b]);
        assert!(index.leave(b, conv));
        assert_eq!(index.conversation_count(), 0);
        assert!(!index.leave(b, conv));
    }
}
