use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ChatError;

pub const MAX_CONTENT_LEN: usize = 512;

/// A persisted chat message. Immutable once appended except for the read
/// flag, which only ever moves false -> true.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub conversation: String,
    pub from_user: String,
    pub to_user: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub statement: Option<i64>,
}

/// Append-only message log, one ordered sequence per conversation key.
/// Timestamps are server-assigned and monotone within a conversation.
#[derive(Default)]
pub struct MessageStore {
    messages: RwLock<HashMap<String, Vec<Message>>>,
}

impl MessageStore {
    pub async fn append(
        &self,
        conversation: &str,
        from_user: &str,
        to_user: &str,
        content: &str,
        statement: Option<i64>,
    ) -> Result<Message, ChatError> {
        if content.is_empty() {
            return Err(ChatError::Validation("message is empty".to_string()));
        }
        if content.chars().count() > MAX_CONTENT_LEN {
            return Err(ChatError::Validation(format!(
                "message exceeds {MAX_CONTENT_LEN} characters"
            )));
        }

        let mut messages = self.messages.write().await;
        let log = messages.entry(conversation.to_string()).or_default();

        let mut timestamp = Utc::now();
        if let Some(last) = log.last() {
            if timestamp < last.timestamp {
                timestamp = last.timestamp;
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation: conversation.to_string(),
            from_user: from_user.to_string(),
            to_user: to_user.to_string(),
            content: content.to_string(),
            timestamp,
            read: false,
            statement,
        };
        log.push(message.clone());
        Ok(message)
    }

    /// The `limit` newest messages, newest first.
    pub async fn recent(&self, conversation: &str, limit: usize) -> Vec<Message> {
        self.page(conversation, 0, limit).await
    }

    /// A newest-first page of messages, skipping `offset` from the top.
    pub async fn page(&self, conversation: &str, offset: usize, limit: usize) -> Vec<Message> {
        let messages = self.messages.read().await;
        messages
            .get(conversation)
            .map(|log| log.iter().rev().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn count(&self, conversation: &str) -> usize {
        let messages = self.messages.read().await;
        messages.get(conversation).map_or(0, Vec::len)
    }

    /// Unread messages addressed to the account, across all conversations.
    pub async fn count_unread(&self, account: &str) -> usize {
        let messages = self.messages.read().await;
        messages
            .values()
            .flatten()
            .filter(|m| m.to_user == account && !m.read)
            .count()
    }

    /// Marks every message in the conversation addressed to `reader` as
    /// read. Calling it again is a no-op.
    pub async fn mark_read(&self, conversation: &str, reader: &str) {
        let mut messages = self.messages.write().await;
        if let Some(log) = messages.get_mut(conversation) {
            for message in log.iter_mut().filter(|m| m.to_user == reader) {
                message.read = true;
            }
        }
    }

    /// Distinct conversation keys the account has sent or received in,
    /// in no particular order.
    pub async fn conversations_for(&self, account: &str) -> Vec<String> {
        let messages = self.messages.read().await;
        messages
            .iter()
            .filter(|(_, log)| {
                log.iter()
                    .any(|m| m.from_user == account || m.to_user == account)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }
}
