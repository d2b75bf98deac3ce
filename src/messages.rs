use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::ChatMessage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientFrame {
    #[serde(rename = "joinroom")]
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    #[serde(rename = "sendmessage")]
    SendMessage {
        #[serde(rename = "roomId")]
        room_id: String,
        message: String,
    },
    #[serde(rename = "getmessages")]
    GetMessages {
        #[serde(rename = "roomId")]
        room_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ServerFrame {
    #[serde(rename = "messageHistory")]
    MessageHistory { messages: Vec<ChatMessage> },
    #[serde(rename = "newMessage")]
    NewMessage { message: ChatMessage },
    #[serde(rename = "userJoined")]
    UserJoined {
        #[serde(rename = "userId")]
        user_id: String,
        username: String,
        timestamp: DateTime<Utc>,
    },
}

const SERVER_ACTIONS: [&str; 3] = ["messageHistory", "newMessage", "userJoined"];

impl ClientFrame {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AppError::Decode(e.to_string()))
    }
}

impl ServerFrame {
    /// Decode one inbound text frame. Anything that is not valid JSON, has
    /// no `action`, names an action outside the known set, or is missing
    /// fields for its action is rejected.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| AppError::Frame(format!("malformed JSON: {e}")))?;

        let action = match value.get("action").and_then(Value::as_str) {
            Some(action) => action.to_string(),
            None => return Err(AppError::Frame("missing action".to_string())),
        };
        if !SERVER_ACTIONS.contains(&action.as_str()) {
            return Err(AppError::Frame(format!("unrecognised action {action:?}")));
        }

        serde_json::from_value(value).map_err(|e| AppError::Frame(format!("invalid {action} frame: {e}")))
    }
}
