//! Realtime chat infrastructure
//!
//! Connection registry, conversation participant index, wire events and the
//! per-connection session that routes chat messages to the agent gateway.

pub mod accumulator;
pub mod connection;
pub mod events;
pub mod heartbeat;
pub mod hub;
pub mod participants;
pub mod registry;
pub mod session;

pub use accumulator::StreamAccumulator;
pub use connection::{
    BackpressurePolicy, Connection, ConnectionId, ConversationId, SendOutcome, UserId,
};
pub use events::{ClientEvent, DecodeError, MessageView, ServerEvent};
pub use heartbeat::HeartbeatConfig;
pub use hub::{RealtimeHub, RealtimeStats};
pub use participants::ParticipantIndex;
pub use registry::{ConnectionRegistry, RegistryStats};
pub use session::{ChatSession, SessionSettings};
