//! Real-time chat over one WebSocket connection.
//!
//! The view-model owns at most one socket. Inbound frames are decoded into
//! [`ServerFrame`] and applied to [`ChatState`] by a reader task; outbound
//! frames go through an unbounded channel drained by a writer task. There is
//! no reconnect: after a close or error the caller has to `connect` again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::messages::{ClientFrame, ServerFrame};
use crate::models::{ChatMessage, MessageKind};
use crate::session::SessionStore;

pub const DEFAULT_ROOM: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatState {
    pub connection: ConnectionState,
    pub room: String,
    pub messages: Vec<ChatMessage>,
    pub draft: String,
    pub error: Option<String>,
    #[serde(skip)]
    generation: u64,
}

impl Default for ChatState {
    fn default() -> Self {
        ChatState {
            connection: ConnectionState::Disconnected,
            room: DEFAULT_ROOM.to_string(),
            messages: Vec::new(),
            draft: String::new(),
            error: None,
            generation: 0,
        }
    }
}

impl ChatState {
    pub fn apply(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::MessageHistory { messages } => {
                debug!("Replacing history with {} messages", messages.len());
                self.messages = messages;
            }
            ServerFrame::NewMessage { message } => self.messages.push(message),
            ServerFrame::UserJoined {
                username, timestamp, ..
            } => self.messages.push(system_message(&username, timestamp)),
        }
    }

    /// Decode and apply one text frame. Rejected frames leave the message
    /// list alone and are reported through `error`.
    pub fn receive(&mut self, text: &str) {
        match ServerFrame::decode(text) {
            Ok(frame) => self.apply(frame),
            Err(e) => {
                warn!("Dropping inbound frame: {}", e);
                self.error = Some(e.to_string());
            }
        }
    }
}

fn system_message(username: &str, timestamp: DateTime<Utc>) -> ChatMessage {
    ChatMessage {
        id: format!("system-{}", Uuid::new_v4()),
        author_id: "system".to_string(),
        author_name: "System".to_string(),
        body: format!("{username} joined the room"),
        timestamp,
        kind: MessageKind::System,
    }
}

struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl Link {
    fn close(self) {
        let _ = self.outbound.send(Message::Close(None));
        self.reader.abort();
        self.watcher.abort();
    }
}

pub struct ChatViewModel {
    url: String,
    session: Arc<SessionStore>,
    state: Arc<RwLock<ChatState>>,
    link: Mutex<Option<Link>>,
}

impl ChatViewModel {
    pub fn new(url: impl Into<String>, session: Arc<SessionStore>) -> Self {
        ChatViewModel {
            url: url.into(),
            session,
            state: Arc::new(RwLock::new(ChatState::default())),
            link: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> ChatState {
        self.state.read().await.clone()
    }

    pub async fn connection(&self) -> ConnectionState {
        self.state.read().await.connection
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().await.messages.clone()
    }

    pub async fn room(&self) -> String {
        self.state.read().await.room.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn set_draft(&self, text: impl Into<String>) {
        self.state.write().await.draft = text.into();
    }

    /// Open the socket for the signed-in user and join the default room.
    /// Any previous connection is closed first.
    pub async fn connect(&self) -> Result<()> {
        // Subscribed before reading so a sign-out during the handshake is
        // still seen by the watcher.
        let mut identity_rx = self.session.subscribe();
        let Some(identity) = self.session.identity().await else {
            error!("Cannot connect to chat without a signed-in user");
            self.state.write().await.error = Some(AppError::AuthRequired.to_string());
            return Err(AppError::AuthRequired);
        };

        let url = Url::parse_with_params(
            &self.url,
            &[("userId", identity.user_id.as_str()), ("username", identity.username.as_str())],
        )
        .map_err(|e| AppError::InvalidUrl(e.to_string()))?;

        let mut link = self.link.lock().await;
        if let Some(previous) = link.take() {
            previous.close();
        }

        let generation = {
            let mut state = self.state.write().await;
            state.generation += 1;
            state.connection = ConnectionState::Connecting;
            state.error = None;
            state.generation
        };

        info!("Connecting to chat as {}", identity.username);
        let ws_stream = match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                error!("Chat connection failed: {}", e);
                let mut state = self.state.write().await;
                state.connection = ConnectionState::Disconnected;
                state.error = Some(e.to_string());
                return Err(e.into());
            }
        };
        info!("Chat connection open");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_tx.send(message).await {
                    error!("Failed to send chat frame: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let state = Arc::clone(&self.state);
        let reader = tokio::spawn(async move {
            while let Some(result) = ws_rx.next().await {
                match result {
                    Ok(Message::Text(text)) => state.write().await.receive(text.as_str()),
                    Ok(Message::Close(_)) => {
                        info!("Chat connection closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Chat connection error: {}", e);
                        break;
                    }
                }
            }
            let mut state = state.write().await;
            if state.generation == generation {
                state.connection = ConnectionState::Disconnected;
            }
        });

        let closer = tx.clone();
        let watcher = tokio::spawn(async move {
            while identity_rx.changed().await.is_ok() {
                if identity_rx.borrow_and_update().is_none() {
                    info!("Signed out, closing chat connection");
                    let _ = closer.send(Message::Close(None));
                    break;
                }
            }
        });

        self.state.write().await.connection = ConnectionState::Connected;
        *link = Some(Link {
            outbound: tx,
            reader,
            watcher,
        });
        drop(link);

        self.join_room(DEFAULT_ROOM).await
    }

    /// Switch rooms. The frame is only sent over an open socket, but the
    /// local room changes first, whatever the send does, and is never
    /// confirmed by the server.
    pub async fn join_room(&self, room_id: &str) -> Result<()> {
        let frame = ClientFrame::JoinRoom {
            room_id: room_id.to_string(),
        };
        self.state.write().await.room = room_id.to_string();
        self.send_frame(&frame).await.map(drop)
    }

    /// Send a chat line to the current room and clear the draft. Returns
    /// `false` without sending when the socket is not open or the text is
    /// blank. The message shows up once the server echoes it back.
    pub async fn send_message(&self, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        let frame = ClientFrame::SendMessage {
            room_id: self.room().await,
            message: text.to_string(),
        };
        let sent = self.send_frame(&frame).await?;
        if sent {
            self.state.write().await.draft.clear();
        }
        Ok(sent)
    }

    /// Ask the server to replay the current room's history.
    pub async fn request_history(&self) -> Result<bool> {
        let frame = ClientFrame::GetMessages {
            room_id: self.room().await,
        };
        self.send_frame(&frame).await
    }

    pub async fn disconnect(&self) {
        if let Some(link) = self.link.lock().await.take() {
            link.close();
            let mut state = self.state.write().await;
            state.generation += 1;
            state.connection = ConnectionState::Disconnected;
            info!("Chat connection closed");
        }
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<bool> {
        let link = self.link.lock().await;
        let Some(link) = link.as_ref() else {
            return Ok(false);
        };
        if self.connection().await != ConnectionState::Connected {
            return Ok(false);
        }
        link.outbound
            .send(Message::text(frame.encode()?))
            .map_err(|_| AppError::NotConnected)?;
        Ok(true)
    }
}

impl Drop for ChatViewModel {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(id: &str, body: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            author_id: "u1".to_string(),
            author_name: "ada".to_string(),
            body: body.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 5, 14, 30, 0).unwrap(),
            kind: MessageKind::Normal,
        }
    }

    #[test]
    fn history_replaces_existing_messages() {
        let mut state = ChatState::default();
        state.messages.push(message("old", "stale"));

        let history = vec![message("m1", "one"), message("m2", "two"), message("m3", "three")];
        state.apply(ServerFrame::MessageHistory {
            messages: history.clone(),
        });

        assert_eq!(state.messages, history);
    }

    #[test]
    fn new_message_appends_unchanged() {
        let mut state = ChatState::default();
        state.messages.push(message("m1", "one"));
        let incoming = message("m2", "two");

        state.apply(ServerFrame::NewMessage {
            message: incoming.clone(),
        });

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages.last(), Some(&incoming));
    }

    #[test]
    fn user_joined_synthesizes_system_message() {
        let mut state = ChatState::default();
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 15, 0, 0).unwrap();

        state.apply(ServerFrame::UserJoined {
            user_id: "u2".to_string(),
            username: "grace".to_string(),
            timestamp: at,
        });

        let joined = &state.messages[0];
        assert_eq!(joined.kind, MessageKind::System);
        assert_eq!(joined.body, "grace joined the room");
        assert_eq!(joined.timestamp, at);
        assert!(joined.id.starts_with("system-"));
    }

    #[test]
    fn rejected_frames_leave_messages_and_set_error() {
        let mut state = ChatState::default();
        state.messages.push(message("m1", "one"));

        state.receive("{oops");
        assert_eq!(state.messages.len(), 1);
        assert!(state.error.as_deref().unwrap().contains("malformed JSON"));

        state.receive(r#"{"action":"userLeft","userId":"u1"}"#);
        assert_eq!(state.messages.len(), 1);
        assert!(state.error.as_deref().unwrap().contains("userLeft"));
    }

    #[tokio::test]
    async fn join_room_moves_locally_even_if_the_writer_is_gone() {
        let session = SessionStore::open(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            Arc::new(crate::storage::MemoryStorage::new()),
        )
        .await
        .unwrap();
        let chat = ChatViewModel::new("ws://127.0.0.1:9/chat", Arc::new(session));

        let (outbound, rx) = mpsc::unbounded_channel();
        drop(rx);
        *chat.link.lock().await = Some(Link {
            outbound,
            reader: tokio::spawn(async {}),
            watcher: tokio::spawn(async {}),
        });
        chat.state.write().await.connection = ConnectionState::Connected;

        let err = chat.join_room("rust").await.unwrap_err();
        assert!(matches!(err, AppError::NotConnected));
        assert_eq!(chat.room().await, "rust");
    }
}
