use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use serde::Deserialize;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

pub type UserId = Uuid;
pub type ConnectionId = Uuid;
pub type ConversationId = Uuid;

/// What to do when a connection's outbound queue is full
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Close the slow connection; it is pruned like a failed send (default)
    #[default]
    Disconnect,
    /// Drop the frame for this connection only
    DropMessage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Queue full under [`BackpressurePolicy::DropMessage`]
    Dropped,
    /// The connection is closed and should be pruned
    Gone,
}

struct ConnectionInner {
    id: ConnectionId,
    user_id: UserId,
    sender: mpsc::Sender<Utf8Bytes>,
    policy: BackpressurePolicy,
    closed: AtomicBool,
    close_signal: Notify,
    sent: AtomicU64,
    dropped: AtomicU64,
}

/// Handle to one live realtime channel.
///
/// Frames are queued on a bounded channel drained by the socket writer task.
/// Clones share the same underlying connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Create a connection for `user_id` and the receiving half of its
    /// outbound queue.
    pub fn new(
        user_id: UserId,
        buffer: usize,
        policy: BackpressurePolicy,
    ) -> (Self, mpsc::Receiver<Utf8Bytes>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let conn = Self {
            inner: Arc::new(ConnectionInner {
                id: Uuid::new_v4(),
                user_id,
                sender,
                policy,
                closed: AtomicBool::new(false),
                close_signal: Notify::new(),
                sent: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        };
        (conn, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn user_id(&self) -> UserId {
        self.inner.user_id
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Utf8Bytes) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Gone;
        }
        match self.inner.sender.try_send(frame) {
            Ok(()) => {
                self.inner.sent.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Delivered
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                SendOutcome::Gone
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                match self.inner.policy {
                    BackpressurePolicy::DropMessage => SendOutcome::Dropped,
                    BackpressurePolicy::Disconnect => {
                        tracing::warn!(
                            user_id = %self.inner.user_id,
                            connection_id = %self.inner.id,
                            "outbound queue full, disconnecting slow connection"
                        );
                        self.close();
                        SendOutcome::Gone
                    }
                }
            }
        }
    }

    /// Mark the connection closed and wake its socket tasks.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.close_signal.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let notified = self.inner.close_signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    pub fn sent_count(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}
