use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Events pushed by the server over the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A message addressed to (or echoed back to) this user
    NewMessage(Message),

    /// A user came online
    UserOnline {
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// A user went offline
    UserOffline {
        #[serde(rename = "userId")]
        user_id: String,
    },
}

/// Commands sent FROM client TO server over the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RealtimeCommand {
    /// Announce presence; sent on every (re)connect
    Join {
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// Relay a server-confirmed message to its recipient
    SendMessage(Message),
}
