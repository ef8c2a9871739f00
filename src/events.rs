use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::{AccountView, StatementView};

/// Events a client may send on a conversation socket.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "chat_message")]
    ChatMessage {
        message: String,
        #[serde(default)]
        statement: Option<i64>,
    },
    #[serde(rename = "read_messages")]
    ReadMessages,
}

/// Events the server pushes on either socket type.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Initial history snapshot on conversation connect. The event name is
    /// part of the client API contract; the page it carries holds at most
    /// ten messages.
    #[serde(rename = "last_50_messages")]
    LastMessages {
        messages: Vec<MessageView>,
        has_more: bool,
    },
    #[serde(rename = "chat_message_echo")]
    ChatMessageEcho { name: String, message: MessageView },
    #[serde(rename = "user_leave")]
    UserLeave { user: String },
    #[serde(rename = "new_message_notification")]
    NewMessageNotification { name: String, message: MessageView },
    #[serde(rename = "unread_count")]
    UnreadCount { unread_count: usize },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Serialized form of a stored message, with both participants expanded
/// to account summaries and the optional originating statement attached.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageView {
    pub id: String,
    pub conversation: String,
    pub from_user: AccountView,
    pub to_user: AccountView,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub statement: Option<StatementView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_event_parses_with_and_without_statement() {
        let plain: ClientEvent =
            serde_json::from_str(r#"{"type": "chat_message", "message": "hi"}"#)
                .expect("plain event");
        match plain {
            ClientEvent::ChatMessage { message, statement } => {
                assert_eq!(message, "hi");
                assert!(statement.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let linked: ClientEvent = serde_json::from_str(
            r#"{"type": "chat_message", "message": "offer", "statement": 7}"#,
        )
        .expect("linked event");
        match linked {
            ClientEvent::ChatMessage { statement, .. } => assert_eq!(statement, Some(7)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type": "typing"}"#).is_err());
    }

    #[test]
    fn unread_count_serializes_with_wire_tag() {
        let payload = serde_json::to_string(&ServerEvent::UnreadCount { unread_count: 3 })
            .expect("serialize");
        assert_eq!(payload, r#"{"type":"unread_count","unread_count":3}"#);
    }
}
