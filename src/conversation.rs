use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ChatError;

pub const PARTICIPANT_SEPARATOR: &str = "__";

/// A two-party conversation. The key doubles as the broadcast topic name,
/// so no separate id is ever generated for a conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub key: String,
    pub name: String,
}

/// Derives the stable key for a pair of accounts: the two ids sorted and
/// joined with `__`, identical whichever side initiates.
pub fn conversation_key(a: &str, b: &str) -> Result<String, ChatError> {
    if a.is_empty() || b.is_empty() || a == b {
        return Err(ChatError::InvalidParticipants);
    }
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    Ok(format!("{first}{PARTICIPANT_SEPARATOR}{second}"))
}

/// Splits a client-supplied conversation name into its two participant ids.
pub fn parse_participants(name: &str) -> Result<(String, String), ChatError> {
    let mut parts = name.split(PARTICIPANT_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty() && a != b => {
            Ok((a.to_string(), b.to_string()))
        }
        _ => Err(ChatError::InvalidParticipants),
    }
}

/// Which accounts are currently connected to a conversation's group.
///
/// Membership changes must be atomic, commutative and idempotent; any
/// shared store with those properties can stand behind this trait when the
/// server runs as more than one process.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn add(&self, conversation: &str, account: &str);
    async fn remove(&self, conversation: &str, account: &str);
    async fn members(&self, conversation: &str) -> Vec<String>;
}

#[derive(Default)]
pub struct MemoryPresence {
    online: RwLock<HashMap<String, HashSet<String>>>,
}

#[async_trait]
impl PresenceStore for MemoryPresence {
    async fn add(&self, conversation: &str, account: &str) {
        let mut online = self.online.write().await;
        online
            .entry(conversation.to_string())
            .or_default()
            .insert(account.to_string());
    }

    async fn remove(&self, conversation: &str, account: &str) {
        let mut online = self.online.write().await;
        if let Some(members) = online.get_mut(conversation) {
            members.remove(account);
            if members.is_empty() {
                online.remove(conversation);
            }
        }
    }

    async fn members(&self, conversation: &str) -> Vec<String> {
        let online = self.online.read().await;
        online
            .get(conversation)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Maps conversation keys to records and owns the presence set behind them.
pub struct ConversationDirectory {
    conversations: RwLock<HashMap<String, Conversation>>,
    presence: Arc<dyn PresenceStore>,
}

impl ConversationDirectory {
    pub fn new(presence: Arc<dyn PresenceStore>) -> Self {
        ConversationDirectory {
            conversations: RwLock::new(HashMap::new()),
            presence,
        }
    }

    /// Returns the conversation for the pair, creating it on first use.
    /// Conversations are never deleted.
    pub async fn get_or_create(&self, a: &str, b: &str) -> Result<Conversation, ChatError> {
        let key = conversation_key(a, b)?;
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.entry(key.clone()).or_insert_with(|| Conversation {
            name: key.clone(),
            key,
        });
        Ok(conversation.clone())
    }

    pub async fn get(&self, key: &str) -> Option<Conversation> {
        let conversations = self.conversations.read().await;
        conversations.get(key).cloned()
    }

    pub async fn join(&self, key: &str, account: &str) {
        self.presence.add(key, account).await;
    }

    pub async fn leave(&self, key: &str, account: &str) {
        self.presence.remove(key, account).await;
    }

    pub async fn online(&self, key: &str) -> Vec<String> {
        self.presence.members(key).await
    }
}
