use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Utf8Bytes;
use futures_util::stream;
use joulaa::database::{AgentProfile, MemoryChatStore, Role, MAX_MESSAGE_CHARS};
use joulaa::gateway::{AgentGateway, GatewayError, ReplyRequest, ReplyStream};
use joulaa::realtime::{
    BackpressurePolicy, ChatSession, Connection, RealtimeHub, SessionSettings,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

enum Script {
    Chunks(Vec<&'static str>),
    FailAfter(Vec<&'static str>),
    Stall,
}

struct ScriptedGateway {
    script: Script,
    requests: Mutex<Vec<ReplyRequest>>,
}

impl ScriptedGateway {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ReplyRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AgentGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream_reply(&self, request: ReplyRequest) -> Result<ReplyStream, GatewayError> {
        self.requests.lock().push(request);
        let stream: ReplyStream = match &self.script {
            Script::Chunks(chunks) => Box::pin(stream::iter(
                chunks.iter().map(|c| Ok(c.to_string())).collect::<Vec<_>>(),
            )),
            Script::FailAfter(chunks) => {
                let mut items: Vec<Result<String, GatewayError>> =
                    chunks.iter().map(|c| Ok(c.to_string())).collect();
                items.push(Err(GatewayError::Unavailable("connection reset".into())));
                Box::pin(stream::iter(items))
            }
            Script::Stall => Box::pin(stream::pending()),
        };
        Ok(stream)
    }
}

struct Fixture {
    hub: Arc<RealtimeHub>,
    store: Arc<MemoryChatStore>,
    organization: Uuid,
    user: Uuid,
    conversation: Uuid,
    agent: Uuid,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(MemoryChatStore::new());
        let organization = Uuid::new_v4();
        let user = store.add_user("layla", "user");
        store.add_member(user, organization);
        let conversation = Uuid::new_v4();
        store.insert_conversation(conversation, user, Some(organization));
        let agent = Uuid::new_v4();
        let mut profile = AgentProfile::new(agent, "Finance Assistant", "finance");
        profile.organization_id = Some(organization);
        store.insert_agent(profile);
        Self {
            hub: Arc::new(RealtimeHub::new()),
            store,
            organization,
            user,
            conversation,
            agent,
        }
    }

    fn open_with(
        &self,
        user: Uuid,
        gateway: Arc<dyn AgentGateway>,
        settings: SessionSettings,
    ) -> (ChatSession, mpsc::Receiver<Utf8Bytes>) {
        let (conn, mut rx) = Connection::new(user, 64, BackpressurePolicy::Disconnect);
        let session = ChatSession::open(conn, self.hub.clone(), self.store.clone(), gateway, settings);
        let greeting = drain(&mut rx);
        assert_eq!(greeting.len(), 1);
        assert_eq!(greeting[0]["type"], "connected");
        (session, rx)
    }

    fn open(&self, gateway: Arc<dyn AgentGateway>) -> (ChatSession, mpsc::Receiver<Utf8Bytes>) {
        self.open_with(self.user, gateway, SessionSettings::default())
    }

    /// Second org member who has joined the conversation on its own connection.
    fn observer(&self) -> (Uuid, mpsc::Receiver<Utf8Bytes>) {
        let observer = self.store.add_user("omar", "user");
        self.store.add_member(observer, self.organization);
        let (conn, rx) = Connection::new(observer, 64, BackpressurePolicy::Disconnect);
        self.hub.connections().register(observer, conn);
        self.hub.participants().join(observer, self.conversation);
        (observer, rx)
    }

    async fn join(&self, session: &mut ChatSession, rx: &mut mpsc::Receiver<Utf8Bytes>) {
        let text = json!({"type": "join_conversation", "conversation_id": self.conversation});
        session.handle_text(&text.to_string()).await;
        let frames = drain(rx);
        assert_eq!(frames, vec![json!({"type": "joined_conversation", "conversation_id": self.conversation})]);
    }

    fn send(&self, content: &str, agent: Option<Uuid>) -> String {
        json!({
            "type": "send_message",
            "conversation_id": self.conversation,
            "message": content,
            "agent_id": agent,
        })
        .to_string()
    }
}

fn drain(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(frame.as_str()).unwrap());
    }
    frames
}

fn types(frames: &[Value]) -> Vec<&str> {
    frames.iter().map(|f| f["type"].as_str().unwrap()).collect()
}

fn unused_gateway() -> Arc<ScriptedGateway> {
    ScriptedGateway::new(Script::Chunks(vec![]))
}

#[tokio::test]
async fn empty_content_is_rejected_without_side_effects() {
    let fx = Fixture::new();
    let gateway = unused_gateway();
    let (mut session, mut rx) = fx.open(gateway.clone());
    fx.join(&mut session, &mut rx).await;
    let (_, mut observer_rx) = fx.observer();

    session.handle_text(&fx.send("", None)).await;

    assert_eq!(
        drain(&mut rx),
        vec![json!({"type": "error", "message": "Missing conversation_id or message"})]
    );
    assert!(drain(&mut observer_rx).is_empty());
    assert_eq!(fx.store.message_count(fx.conversation), Some(0));
    assert!(gateway.requests().is_empty());
}

#[tokio::test]
async fn message_without_agent_is_persisted_and_broadcast_once() {
    let fx = Fixture::new();
    let gateway = unused_gateway();
    let (mut session, mut rx) = fx.open(gateway.clone());
    fx.join(&mut session, &mut rx).await;
    let (_, mut observer_rx) = fx.observer();

    session.handle_text(&fx.send("مرحبا", None)).await;

    let stored = fx.store.messages(fx.conversation);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, Role::User);
    assert_eq!(stored[0].user_id, Some(fx.user));

    for frames in [drain(&mut rx), drain(&mut observer_rx)] {
        assert_eq!(types(&frames), vec!["new_message"]);
        let message = &frames[0]["message"];
        assert_eq!(message["id"], json!(stored[0].id));
        assert_eq!(message["content"], "مرحبا");
        assert_eq!(message["role"], "user");
        assert_eq!(message["user_id"], json!(fx.user));
        assert_eq!(message["conversation_id"], json!(fx.conversation));
    }
    assert!(gateway.requests().is_empty());
}

#[tokio::test]
async fn agent_reply_is_streamed_then_persisted() {
    let fx = Fixture::new();
    let gateway = ScriptedGateway::new(Script::Chunks(vec!["Hel", "lo"]));
    let (mut session, mut rx) = fx.open(gateway.clone());
    fx.join(&mut session, &mut rx).await;
    let (_, mut observer_rx) = fx.observer();

    session.handle_text(&fx.send("Hi there", Some(fx.agent))).await;

    let stored = fx.store.messages(fx.conversation);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].role, Role::User);
    assert_eq!(stored[1].role, Role::Assistant);
    assert_eq!(stored[1].content, "Hello");
    assert_eq!(stored[1].agent_id, Some(fx.agent));
    assert_eq!(stored[1].user_id, None);

    for frames in [drain(&mut rx), drain(&mut observer_rx)] {
        assert_eq!(
            types(&frames),
            vec!["new_message", "message_chunk", "message_chunk", "message_complete"]
        );
        assert_eq!(frames[1]["chunk"], "Hel");
        assert_eq!(frames[2]["chunk"], "lo");
        assert_eq!(frames[1]["conversation_id"], json!(fx.conversation));
        let complete = &frames[3];
        assert_eq!(complete["conversation_id"], json!(fx.conversation));
        assert_eq!(complete["message"]["id"], json!(stored[1].id));
        assert_eq!(complete["message"]["content"], "Hello");
        assert_eq!(complete["message"]["role"], "assistant");
        assert_eq!(complete["message"]["agent_id"], json!(fx.agent));
    }

    let requests = gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].message, "Hi there");
    assert_eq!(requests[0].agent.id, fx.agent);
    assert!(requests[0].history.is_empty());
}

#[tokio::test]
async fn failed_stream_discards_partial_reply() {
    let fx = Fixture::new();
    let gateway = ScriptedGateway::new(Script::FailAfter(vec!["Hel"]));
    let (mut session, mut rx) = fx.open(gateway);
    fx.join(&mut session, &mut rx).await;
    let (_, mut observer_rx) = fx.observer();

    session.handle_text(&fx.send("Hi", Some(fx.agent))).await;

    let frames = drain(&mut rx);
    assert_eq!(types(&frames), vec!["new_message", "message_chunk", "error"]);
    assert_eq!(frames[1]["chunk"], "Hel");
    assert_eq!(frames[2]["message"], "Failed to generate AI response");

    // The error goes to the sender only.
    assert_eq!(types(&drain(&mut observer_rx)), vec!["new_message", "message_chunk"]);

    let stored = fx.store.messages(fx.conversation);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, Role::User);
}

#[tokio::test(start_paused = true)]
async fn stalled_stream_times_out() {
    let fx = Fixture::new();
    let gateway = ScriptedGateway::new(Script::Stall);
    let settings = SessionSettings {
        chunk_timeout: Duration::from_secs(5),
        ..SessionSettings::default()
    };
    let (mut session, mut rx) = fx.open_with(fx.user, gateway, settings);
    fx.join(&mut session, &mut rx).await;

    session.handle_text(&fx.send("Hi", Some(fx.agent))).await;

    let frames = drain(&mut rx);
    assert_eq!(types(&frames), vec!["new_message", "error"]);
    assert_eq!(frames[1]["message"], "Failed to generate AI response");
    assert_eq!(fx.store.messages(fx.conversation).len(), 1);
}

#[tokio::test]
async fn unknown_agent_is_reported() {
    let fx = Fixture::new();
    let gateway = unused_gateway();
    let (mut session, mut rx) = fx.open(gateway.clone());
    fx.join(&mut session, &mut rx).await;

    session.handle_text(&fx.send("Hi", Some(Uuid::new_v4()))).await;

    let frames = drain(&mut rx);
    assert_eq!(types(&frames), vec!["new_message", "error"]);
    assert_eq!(frames[1]["message"], "Agent not found");
    assert!(gateway.requests().is_empty());
}

#[tokio::test]
async fn agent_of_another_organization_is_not_found() {
    let fx = Fixture::new();
    let foreign = Uuid::new_v4();
    let mut profile = AgentProfile::new(foreign, "Sales Assistant", "sales");
    profile.organization_id = Some(Uuid::new_v4());
    fx.store.insert_agent(profile);

    let gateway = unused_gateway();
    let (mut session, mut rx) = fx.open(gateway.clone());
    fx.join(&mut session, &mut rx).await;

    session.handle_text(&fx.send("Hi", Some(foreign))).await;

    let frames = drain(&mut rx);
    assert_eq!(types(&frames), vec!["new_message", "error"]);
    assert_eq!(frames[1]["message"], "Agent not found");
    assert!(gateway.requests().is_empty());
    assert_eq!(fx.store.messages(fx.conversation).len(), 1);
}

#[tokio::test]
async fn oversized_message_is_rejected() {
    let fx = Fixture::new();
    let gateway = unused_gateway();
    let (mut session, mut rx) = fx.open(gateway.clone());
    fx.join(&mut session, &mut rx).await;
    let (_, mut observer_rx) = fx.observer();

    let content = "x".repeat(MAX_MESSAGE_CHARS * 2);
    session.handle_text(&fx.send(&content, Some(fx.agent))).await;

    assert_eq!(
        drain(&mut rx),
        vec![json!({"type": "error", "message": "Failed to send message"})]
    );
    assert!(drain(&mut observer_rx).is_empty());
    assert_eq!(fx.store.message_count(fx.conversation), Some(0));
    assert!(gateway.requests().is_empty());
}

#[tokio::test]
async fn history_is_bounded_and_excludes_the_new_message() {
    let fx = Fixture::new();
    let gateway = ScriptedGateway::new(Script::Chunks(vec!["ok"]));
    let settings = SessionSettings {
        history_window: 2,
        ..SessionSettings::default()
    };
    let (mut session, mut rx) = fx.open_with(fx.user, gateway.clone(), settings);

    for content in ["one", "two", "three"] {
        session.handle_text(&fx.send(content, None)).await;
    }
    session.handle_text(&fx.send("four", Some(fx.agent))).await;
    drain(&mut rx);

    let requests = gateway.requests();
    assert_eq!(requests.len(), 1);
    let history: Vec<&str> = requests[0].history.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(history, vec!["two", "three"]);
    assert_eq!(requests[0].message, "four");
}

#[tokio::test]
async fn unknown_type_only_reports_an_error() {
    let fx = Fixture::new();
    let gateway = unused_gateway();
    let (mut session, mut rx) = fx.open(gateway.clone());
    fx.join(&mut session, &mut rx).await;
    let (_, mut observer_rx) = fx.observer();

    let text = json!({"type": "dance", "conversation_id": fx.conversation}).to_string();
    session.handle_text(&text).await;

    assert_eq!(
        drain(&mut rx),
        vec![json!({"type": "error", "message": "Unknown message type: dance"})]
    );
    assert!(drain(&mut observer_rx).is_empty());
    assert_eq!(fx.store.message_count(fx.conversation), Some(0));
    assert!(gateway.requests().is_empty());
}

#[tokio::test]
async fn malformed_frame_keeps_the_session_usable() {
    let fx = Fixture::new();
    let (mut session, mut rx) = fx.open(unused_gateway());

    session.handle_text("{not json").await;
    assert_eq!(
        drain(&mut rx),
        vec![json!({"type": "error", "message": "Invalid JSON format"})]
    );

    fx.join(&mut session, &mut rx).await;
}

#[tokio::test]
async fn outsider_cannot_post() {
    let fx = Fixture::new();
    let outsider = fx.store.add_user("eve", "user");
    let (mut session, mut rx) =
        fx.open_with(outsider, unused_gateway(), SessionSettings::default());

    session.handle_text(&fx.send("let me in", None)).await;

    assert_eq!(
        drain(&mut rx),
        vec![json!({"type": "error", "message": "Failed to send message"})]
    );
    assert_eq!(fx.store.message_count(fx.conversation), Some(0));
}

#[tokio::test]
async fn typing_is_not_echoed_to_sender() {
    let fx = Fixture::new();
    let (mut session, mut rx) = fx.open(unused_gateway());
    fx.join(&mut session, &mut rx).await;
    let (_, mut observer_rx) = fx.observer();

    let text = json!({"type": "typing", "conversation_id": fx.conversation, "is_typing": true});
    session.handle_text(&text.to_string()).await;

    assert!(drain(&mut rx).is_empty());
    assert_eq!(
        drain(&mut observer_rx),
        vec![json!({
            "type": "typing",
            "user_id": fx.user,
            "is_typing": true,
            "conversation_id": fx.conversation,
        })]
    );
}

#[tokio::test]
async fn leave_confirms_and_stops_delivery() {
    let fx = Fixture::new();
    let (mut session, mut rx) = fx.open(unused_gateway());
    fx.join(&mut session, &mut rx).await;

    let text = json!({"type": "leave_conversation", "conversation_id": fx.conversation});
    session.handle_text(&text.to_string()).await;
    assert_eq!(
        drain(&mut rx),
        vec![json!({"type": "left_conversation", "conversation_id": fx.conversation})]
    );

    session.handle_text(&fx.send("anyone?", None)).await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(fx.store.message_count(fx.conversation), Some(1));
}

#[tokio::test]
async fn closing_the_last_connection_cleans_up() {
    let fx = Fixture::new();
    let (mut first, mut first_rx) = fx.open(unused_gateway());
    let (second, _second_rx) = fx.open(unused_gateway());
    fx.join(&mut first, &mut first_rx).await;
    assert_eq!(fx.hub.connections().connection_count(fx.user), 2);

    let first_conn = first.connection().clone();
    drop(first);
    assert!(first_conn.is_closed());
    assert_eq!(fx.hub.connections().connection_count(fx.user), 1);
    assert!(fx.hub.participants().is_participant(fx.user, fx.conversation));

    drop(second);
    assert!(!fx.hub.connections().is_connected(fx.user));
    assert!(!fx.hub.participants().is_participant(fx.user, fx.conversation));
    assert_eq!(fx.hub.stats().total_connections, 0);
}
