use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::models::{ChatLog, LeadStatus};
use crate::error::{Error, Result};

/// Push message kinds the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ContactUpdate,
    ChatLogUpdate,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ContactUpdate => "contact_update",
            Topic::ChatLogUpdate => "chatlog_update",
        }
    }
}

impl FromStr for Topic {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "contact_update" => Ok(Topic::ContactUpdate),
            "chatlog_update" => Ok(Topic::ChatLogUpdate),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Field-level delta for a contact. Fields left out of the payload stay untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub contact_id: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lead_status: Option<LeadStatus>,
    #[serde(default)]
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLogUpdate {
    pub id: String,
    pub contact_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub media: Option<String>,
    pub from_me: bool,
    pub sent_at: DateTime<Utc>,
}

impl From<ChatLogUpdate> for ChatLog {
    fn from(u: ChatLogUpdate) -> Self {
        ChatLog {
            id: u.id,
            id_contact: u.contact_id,
            message: u.message,
            kind: u.kind,
            media: u.media,
            from_me: u.from_me,
            sent_at: u.sent_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ContactUpdate(ContactUpdate),
    ChatLogUpdate(ChatLogUpdate),
}

impl ServerEvent {
    pub fn topic(&self) -> Topic {
        match self {
            ServerEvent::ContactUpdate(_) => Topic::ContactUpdate,
            ServerEvent::ChatLogUpdate(_) => Topic::ChatLogUpdate,
        }
    }

    /// Decode one text frame.
    ///
    /// `Ok(None)` means the frame carried a `type` this client does not know.
    /// A known `type` whose `data` does not match is an error.
    pub fn decode(text: &str) -> Result<Option<Self>> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| Error::decode("push envelope", e))?;
        let Ok(topic) = envelope.kind.parse::<Topic>() else {
            return Ok(None);
        };
        let event = match topic {
            Topic::ContactUpdate => ServerEvent::ContactUpdate(
                serde_json::from_value(envelope.data)
                    .map_err(|e| Error::decode("contact_update", e))?,
            ),
            Topic::ChatLogUpdate => ServerEvent::ChatLogUpdate(
                serde_json::from_value(envelope.data)
                    .map_err(|e| Error::decode("chatlog_update", e))?,
            ),
        };
        Ok(Some(event))
    }
}

/// Scope change requests sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    SubscribeContact { contact_id: String },
    UnsubscribeContact { contact_id: String },
}
