//! Per-connection protocol state machine.
//!
//! A connection starts out [`Connected`](SessionState::Connected), becomes
//! [`Named`](SessionState::Named) once it sets a display name and ends when
//! [`Coordinator::disconnect`] consumes its [`Participant`].

use std::fmt;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    events::{ClientEvent, ServerEvent},
    fabric::Fabric,
    presence::{Presence, Roster},
    store::MessageStore,
};

pub const ANONYMOUS: &str = "Anonymous";
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Named,
}

/// The identity of one live connection. Owned by the connection's task.
#[derive(Debug)]
pub struct Participant {
    id: ConnectionId,
    name: Option<String>,
}

impl Participant {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        match self.name {
            Some(_) => SessionState::Named,
            None => SessionState::Connected,
        }
    }

    /// The name used for presence and authorship; anonymous until named.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(ANONYMOUS)
    }
}

/// Trims a requested display name, falling back to [`ANONYMOUS`].
pub fn resolve_name(requested: Option<&str>) -> String {
    match requested.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => ANONYMOUS.to_owned(),
    }
}

pub struct Coordinator<S, F> {
    presence: Presence,
    store: S,
    fabric: F,
    history_limit: u32,
}

impl<S: MessageStore, F: Fabric> Coordinator<S, F> {
    pub fn new(store: S, fabric: F, history_limit: u32) -> Self {
        Self {
            presence: Presence::new(),
            store,
            fabric,
            history_limit,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fabric(&self) -> &F {
        &self.fabric
    }

    pub fn connect(&self) -> Participant {
        let participant = Participant {
            id: ConnectionId::new(),
            name: None,
        };
        debug!(conn = %participant.id, "connected");
        participant
    }

    pub async fn handle(&self, participant: &mut Participant, event: ClientEvent) {
        match event {
            ClientEvent::SetUsername(name) => self.set_name(participant, name.as_str()).await,
            ClientEvent::UserMessage(text) => self.send_message(participant, text.as_str()).await,
            ClientEvent::Typing => self.start_typing(participant),
            ClientEvent::StopTyping => self.stop_typing(participant),
        }
    }

    /// Names the participant, announces it if the name is new to the online
    /// roster and replays recent history to this connection only.
    pub async fn set_name(&self, participant: &mut Participant, requested: Option<&str>) {
        let name = resolve_name(requested);

        if let Some(previous) = participant.name.take_if(|previous| *previous != name) {
            info!(conn = %participant.id, %previous, %name, "participant renamed");
            self.release(&previous);
        }

        if self.presence.join(&name, self.publish(Roster::Online)) {
            info!(conn = %participant.id, %name, "joined");
        }
        participant.name = Some(name);

        match self.store.recent(self.history_limit).await {
            Ok(messages) => self.fabric.send_to(participant.id, ServerEvent::history(messages)),
            Err(err) => warn!(conn = %participant.id, error = %err, "skipping message history"),
        }
    }

    /// Stores and broadcasts a message. Blank text is ignored; store failures
    /// are logged and nothing is broadcast.
    pub async fn send_message(&self, participant: &Participant, text: Option<&str>) {
        let Some(text) = text.map(str::trim).filter(|text| !text.is_empty()) else {
            debug!(conn = %participant.id, "ignoring empty message");
            return;
        };

        match self.store.append(participant.display_name(), text).await {
            Ok(message) => self.fabric.broadcast(ServerEvent::Message(message.into())),
            Err(err) => error!(conn = %participant.id, error = %err, "dropping message"),
        }
    }

    /// Only named participants can type: a name must be online before it shows up as typing.
    pub fn start_typing(&self, participant: &Participant) {
        if participant.state() == SessionState::Connected {
            debug!(conn = %participant.id, "ignoring typing before a name is set");
            return;
        }
        self.presence
            .start_typing(participant.display_name(), self.publish(Roster::Typing));
    }

    pub fn stop_typing(&self, participant: &Participant) {
        if participant.state() == SessionState::Connected {
            return;
        }
        self.presence
            .stop_typing(participant.display_name(), self.publish(Roster::Typing));
    }

    pub fn disconnect(&self, participant: Participant) {
        debug!(conn = %participant.id, name = participant.display_name(), "disconnected");
        self.release(participant.display_name());
    }

    fn release(&self, name: &str) {
        if self.presence.leave(name, self.publish(Roster::Online)) {
            info!(%name, "left");
        }
        self.presence.stop_typing(name, self.publish(Roster::Typing));
    }

    fn publish(&self, roster: Roster) -> impl FnOnce(Vec<String>) + '_ {
        move |names| self.fabric.broadcast(ServerEvent::roster(roster, names))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        events::{HistoryEntry, MessagePayload},
        store::{ChatMessage, SqliteStore, StoreError, StoreResult},
    };

    #[derive(Debug, Clone, PartialEq)]
    enum Target {
        All,
        One(ConnectionId),
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Target, ServerEvent)>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<(Target, ServerEvent)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Fabric for Recorder {
        fn send_to(&self, conn: ConnectionId, event: ServerEvent) {
            self.sent.lock().unwrap().push((Target::One(conn), event));
        }

        fn broadcast(&self, event: ServerEvent) {
            self.sent.lock().unwrap().push((Target::All, event));
        }
    }

    struct Unreachable;

    impl MessageStore for Unreachable {
        async fn append(&self, _author: &str, _body: &str) -> StoreResult<ChatMessage> {
            Err(StoreError::Unavailable(sqlx::Error::PoolClosed))
        }

        async fn recent(&self, _limit: u32) -> StoreResult<Vec<ChatMessage>> {
            Err(StoreError::Unavailable(sqlx::Error::PoolClosed))
        }
    }

    async fn coordinator() -> Coordinator<SqliteStore, Recorder> {
        let store = SqliteStore::in_memory().await.unwrap();
        Coordinator::new(store, Recorder::default(), DEFAULT_HISTORY_LIMIT)
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn names_are_trimmed_with_anonymous_fallback() {
        assert_eq!(resolve_name(Some("  Alice ")), "Alice");
        assert_eq!(resolve_name(Some("   ")), ANONYMOUS);
        assert_eq!(resolve_name(None), ANONYMOUS);
    }

    #[tokio::test]
    async fn naming_announces_presence_and_replays_history_to_requester() {
        let chat = coordinator().await;
        let mut alice = chat.connect();
        assert_eq!(alice.state(), SessionState::Connected);

        chat.set_name(&mut alice, Some("Alice")).await;

        assert_eq!(alice.state(), SessionState::Named);
        assert_eq!(
            chat.fabric().take(),
            [
                (Target::All, ServerEvent::OnlineUsers(names(&["Alice"]))),
                (Target::One(alice.id()), ServerEvent::MessageHistory(Vec::new())),
            ]
        );
    }

    #[tokio::test]
    async fn history_is_chronological_and_limited() {
        let store = SqliteStore::in_memory().await.unwrap();
        for body in ["one", "two", "three"] {
            store.append("Bob", body).await.unwrap();
        }
        let chat = Coordinator::new(store, Recorder::default(), 2);

        let mut alice = chat.connect();
        chat.set_name(&mut alice, Some("Alice")).await;

        let sent = chat.fabric().take();
        let Some((Target::One(conn), ServerEvent::MessageHistory(history))) = sent.last() else {
            panic!("no history in {sent:?}");
        };
        assert_eq!(*conn, alice.id());
        let bodies: Vec<_> = history.iter().map(|entry: &HistoryEntry| entry.body.as_str()).collect();
        assert_eq!(bodies, ["two", "three"]);
    }

    #[tokio::test]
    async fn messages_are_broadcast_to_everyone() {
        let chat = coordinator().await;
        let mut alice = chat.connect();
        chat.set_name(&mut alice, Some("Alice")).await;
        chat.fabric().take();

        chat.send_message(&alice, Some("hello")).await;

        assert_eq!(
            chat.fabric().take(),
            [(
                Target::All,
                ServerEvent::Message(MessagePayload {
                    author: "Alice".into(),
                    body: "hello".into(),
                    id: 1,
                })
            )]
        );

        let stored = chat.store().recent(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].author, "Alice");
    }

    #[tokio::test]
    async fn unnamed_senders_are_anonymous() {
        let chat = coordinator().await;
        let ghost = chat.connect();

        chat.send_message(&ghost, Some("  boo  ")).await;

        let stored = chat.store().recent(1).await.unwrap();
        assert_eq!(stored[0].author, ANONYMOUS);
        assert_eq!(stored[0].body, "boo");
    }

    #[tokio::test]
    async fn blank_or_missing_text_is_ignored() {
        let chat = coordinator().await;
        let alice = chat.connect();

        chat.send_message(&alice, Some(" \t ")).await;
        chat.send_message(&alice, None).await;

        assert!(chat.fabric().take().is_empty());
        assert!(chat.store().recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn typing_twice_broadcasts_once() {
        let chat = coordinator().await;
        let mut alice = chat.connect();
        chat.set_name(&mut alice, Some("Alice")).await;
        chat.fabric().take();

        chat.start_typing(&alice);
        chat.start_typing(&alice);
        assert_eq!(
            chat.fabric().take(),
            [(Target::All, ServerEvent::TypingUsers(names(&["Alice"])))]
        );

        chat.stop_typing(&alice);
        chat.stop_typing(&alice);
        assert_eq!(chat.fabric().take(), [(Target::All, ServerEvent::TypingUsers(Vec::new()))]);
    }

    #[tokio::test]
    async fn unnamed_connections_cannot_type() {
        let chat = coordinator().await;
        let ghost = chat.connect();

        chat.start_typing(&ghost);
        chat.stop_typing(&ghost);

        assert!(chat.fabric().take().is_empty());
        assert!(chat.presence.snapshot_typing().is_empty());
        assert!(chat.presence.snapshot_online().is_empty());
    }

    #[tokio::test]
    async fn disconnect_clears_online_and_typing() {
        let chat = coordinator().await;
        let mut alice = chat.connect();
        chat.set_name(&mut alice, Some("Alice")).await;
        chat.start_typing(&alice);
        chat.fabric().take();

        chat.disconnect(alice);

        let sent = chat.fabric().take();
        assert_eq!(sent.len(), 2);
        assert!(sent.contains(&(Target::All, ServerEvent::OnlineUsers(Vec::new()))));
        assert!(sent.contains(&(Target::All, ServerEvent::TypingUsers(Vec::new()))));
    }

    #[tokio::test]
    async fn disconnect_without_typing_only_updates_online() {
        let chat = coordinator().await;
        let mut alice = chat.connect();
        chat.set_name(&mut alice, Some("Alice")).await;
        chat.fabric().take();

        chat.disconnect(alice);

        assert_eq!(chat.fabric().take(), [(Target::All, ServerEvent::OnlineUsers(Vec::new()))]);
    }

    #[tokio::test]
    async fn unnamed_disconnect_is_silent() {
        let chat = coordinator().await;
        let ghost = chat.connect();

        chat.disconnect(ghost);

        assert!(chat.fabric().take().is_empty());
    }

    #[tokio::test]
    async fn shared_names_share_one_presence_entry() {
        let chat = coordinator().await;
        let mut first = chat.connect();
        let mut second = chat.connect();

        chat.set_name(&mut first, Some("Alice")).await;
        chat.fabric().take();

        chat.set_name(&mut second, Some(" Alice ")).await;
        assert_eq!(
            chat.fabric().take(),
            [(Target::One(second.id()), ServerEvent::MessageHistory(Vec::new()))]
        );

        // either connection leaving takes the name offline
        chat.disconnect(first);
        assert_eq!(chat.fabric().take(), [(Target::All, ServerEvent::OnlineUsers(Vec::new()))]);
        assert!(chat.presence.snapshot_online().is_empty());
    }

    #[tokio::test]
    async fn renaming_releases_the_previous_name() {
        let chat = coordinator().await;
        let mut alice = chat.connect();
        chat.set_name(&mut alice, Some("Alice")).await;
        chat.start_typing(&alice);
        chat.fabric().take();

        chat.set_name(&mut alice, Some("Alicia")).await;

        assert_eq!(
            chat.fabric().take(),
            [
                (Target::All, ServerEvent::OnlineUsers(Vec::new())),
                (Target::All, ServerEvent::TypingUsers(Vec::new())),
                (Target::All, ServerEvent::OnlineUsers(names(&["Alicia"]))),
                (Target::One(alice.id()), ServerEvent::MessageHistory(Vec::new())),
            ]
        );
        assert_eq!(alice.display_name(), "Alicia");
    }

    #[tokio::test]
    async fn store_outages_degrade_silently() {
        let chat = Coordinator::new(Unreachable, Recorder::default(), DEFAULT_HISTORY_LIMIT);
        let mut alice = chat.connect();

        chat.set_name(&mut alice, Some("Alice")).await;
        assert_eq!(
            chat.fabric().take(),
            [(Target::All, ServerEvent::OnlineUsers(names(&["Alice"])))]
        );

        chat.send_message(&alice, Some("hello")).await;
        assert!(chat.fabric().take().is_empty());
    }

    #[tokio::test]
    async fn handle_dispatches_wire_events() {
        let chat = coordinator().await;
        let mut alice = chat.connect();

        chat.handle(&mut alice, ClientEvent::SetUsername(serde_json::json!(42))).await;
        assert_eq!(alice.display_name(), ANONYMOUS);
        assert_eq!(alice.state(), SessionState::Named);

        chat.handle(&mut alice, ClientEvent::SetUsername(serde_json::json!("Alice"))).await;
        chat.handle(&mut alice, ClientEvent::UserMessage(serde_json::json!("hi"))).await;
        chat.handle(&mut alice, ClientEvent::Typing).await;
        chat.handle(&mut alice, ClientEvent::StopTyping).await;

        assert_eq!(chat.presence.snapshot_online(), ["Alice"]);
        assert!(chat.presence.snapshot_typing().is_empty());
        assert_eq!(chat.store().recent(5).await.unwrap()[0].author, "Alice");
    }
}
