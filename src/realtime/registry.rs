use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Utf8Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::connection::{Connection, ConnectionId, SendOutcome, UserId};

/// Counters for registry activity
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub users: usize,
    pub connections: usize,
    pub total_registered: u64,
    pub total_pruned: u64,
}

/// Tracks live connections per user.
///
/// Each user's set sits in its own DashMap shard entry, so mutations and
/// iteration for one user are serialized while different users proceed in
/// parallel. Empty sets are removed.
#[derive(Default)]
pub struct ConnectionRegistry {
    users: DashMap<UserId, HashMap<ConnectionId, Connection>>,
    total_registered: AtomicU64,
    total_pruned: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the user's set. Returns `false` if the connection
    /// belongs to another user or is already registered.
    pub fn register(&self, user_id: UserId, conn: Connection) -> bool {
        if conn.user_id() != user_id {
            tracing::warn!(
                user_id = %user_id,
                owner = %conn.user_id(),
                connection_id = %conn.id(),
                "refusing to register connection under a different user"
            );
            return false;
        }
        let inserted = self
            .users
            .entry(user_id)
            .or_default()
            .insert(conn.id(), conn)
            .is_none();
        if inserted {
            self.total_registered.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Remove a connection; the user entry goes away with its last connection.
    pub fn unregister(&self, user_id: UserId, conn_id: ConnectionId) -> bool {
        let mut removed = false;
        self.users.remove_if_mut(&user_id, |_, conns| {
            removed = conns.remove(&conn_id).is_some();
            conns.is_empty()
        });
        removed
    }

    /// Remove a connection and, if the user is left without any, run
    /// `on_last` while the user's entry is still locked. A concurrent
    /// [`register`](Self::register) for the same user waits until `on_last`
    /// returns. Returns the number of connections the user still has.
    pub fn unregister_with(
        &self,
        user_id: UserId,
        conn_id: ConnectionId,
        on_last: impl FnOnce(),
    ) -> usize {
        match self.users.entry(user_id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().remove(&conn_id);
                let remaining = entry.get().len();
                if remaining == 0 {
                    on_last();
                    entry.remove();
                }
                remaining
            }
            // Already pruned after a failed send.
            Entry::Vacant(entry) => {
                on_last();
                drop(entry);
                0
            }
        }
    }

    /// Queue `frame` on every connection of `user_id` and return how many
    /// accepted it. Closed connections are pruned; an offline user is a no-op.
    pub fn send_to_user(&self, user_id: UserId, frame: &Utf8Bytes) -> usize {
        let Some(mut conns) = self.users.get_mut(&user_id) else {
            return 0;
        };

        let mut delivered = 0;
        conns.retain(|conn_id, conn| match conn.send(frame.clone()) {
            SendOutcome::Delivered => {
                delivered += 1;
                true
            }
            SendOutcome::Dropped => true,
            SendOutcome::Gone => {
                tracing::warn!(
                    user_id = %user_id,
                    connection_id = %conn_id,
                    "pruning connection after failed send"
                );
                self.total_pruned.fetch_add(1, Ordering::Relaxed);
                false
            }
        });

        if conns.is_empty() {
            drop(conns);
            self.users.remove_if(&user_id, |_, conns| conns.is_empty());
        }
        delivered
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.users.get(&user_id).map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn total_connections(&self) -> usize {
        self.users.iter().map(|e| e.value().len()).sum()
    }

    /// Connection ids currently held by `user_id`.
    pub fn connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.users
            .get(&user_id)
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Per-user connection counts.
    pub fn snapshot(&self) -> HashMap<UserId, usize> {
        self.users
            .iter()
            .map(|e| (*e.key(), e.value().len()))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            users: self.user_count(),
            connections: self.total_connections(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_pruned: self.total_pruned.load(Ordering::Relaxed),
        }
    }
}
