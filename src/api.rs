use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::Filter;

use crate::conversation::{conversation_key, parse_participants};
use crate::directory::AccountView;
use crate::error::ChatError;
use crate::events::MessageView;
use crate::server::ChatServer;

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// One row in the conversation listing: the conversation plus the peer as
/// seen from the requesting account.
#[derive(Serialize)]
pub struct ConversationEntry {
    pub id: String,
    pub name: String,
    pub other_user: Option<AccountView>,
    pub last_message: Option<MessageView>,
}

#[derive(Serialize)]
pub struct MessagePage {
    pub count: usize,
    pub results: Vec<MessageView>,
}

#[derive(Deserialize)]
struct ConversationsQuery {
    current_account: String,
}

#[derive(Deserialize)]
struct MessagesQuery {
    conversation: String,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// Read-only history endpoints: `/api/conversations` and `/api/messages`.
pub fn filters(
    server: Arc<ChatServer>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let conversations_server = server.clone();
    let conversations = warp::path!("api" / "conversations")
        .and(warp::get())
        .and(warp::query::<ConversationsQuery>())
        .and_then(move |query: ConversationsQuery| {
            let server = conversations_server.clone();
            async move {
                let entries = list_conversations(&server, &query.current_account).await;
                Ok::<_, warp::Rejection>(warp::reply::json(&entries))
            }
        });

    let messages = warp::path!("api" / "messages")
        .and(warp::get())
        .and(warp::query::<MessagesQuery>())
        .and_then(move |query: MessagesQuery| {
            let server = server.clone();
            async move {
                let reply = match message_page(&server, &query).await {
                    Ok(page) => {
                        warp::reply::with_status(warp::reply::json(&page), StatusCode::OK)
                    }
                    Err(e) => warp::reply::with_status(
                        warp::reply::json(&serde_json::json!({ "error": e.to_string() })),
                        StatusCode::BAD_REQUEST,
                    ),
                };
                Ok::<_, warp::Rejection>(reply)
            }
        });

    conversations.or(messages)
}

/// Every conversation the account has exchanged messages in, with the
/// latest message attached.
async fn list_conversations(server: &ChatServer, account: &str) -> Vec<ConversationEntry> {
    let mut keys = server.store().conversations_for(account).await;
    keys.sort();

    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        let other_user = match parse_participants(&key) {
            Ok((a, b)) => {
                let other = if a == account { b } else { a };
                server.accounts().account(&other).await.ok()
            }
            Err(_) => None,
        };
        let last_message = match server.store().recent(&key, 1).await.first() {
            Some(stored) => server.render_message(stored).await.ok(),
            None => None,
        };
        entries.push(ConversationEntry {
            id: key.clone(),
            name: key,
            other_user,
            last_message,
        });
    }
    entries
}

/// A newest-first page of a conversation's history. The name is normalized
/// through key derivation, so both participant orders hit the same log.
async fn message_page(
    server: &ChatServer,
    query: &MessagesQuery,
) -> Result<MessagePage, ChatError> {
    let (a, b) = parse_participants(&query.conversation)?;
    let key = conversation_key(&a, &b)?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let count = server.store().count(&key).await;
    let stored = server.store().page(&key, offset, limit).await;
    let mut results = Vec::with_capacity(stored.len());
    for message in &stored {
        match server.render_message(message).await {
            Ok(view) => results.push(view),
            Err(e) => log::warn!("skipping message {} in listing: {e}", message.id),
        }
    }
    Ok(MessagePage { count, results })
}
