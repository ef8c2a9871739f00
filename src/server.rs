use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};
use warp::Filter;

use crate::bus::{EventSink, GroupBus, MemoryBus};
use crate::config::Settings;
use crate::conversation::{parse_participants, ConversationDirectory, MemoryPresence};
use crate::directory::{AccountDirectory, IdentityResolver, StatementLookup};
use crate::error::ChatError;
use crate::events::{ClientEvent, MessageView, ServerEvent};
use crate::store::{Message as StoredMessage, MessageStore};

/// How many messages the connect snapshot carries.
pub const SNAPSHOT_LIMIT: usize = 10;
/// The count threshold behind `has_more`. Deliberately lower than the
/// snapshot page; the clients were built against this comparison and it is
/// kept as shipped.
pub const HAS_MORE_THRESHOLD: usize = 5;

pub fn notification_topic(account: &str) -> String {
    format!("{account}__notifications")
}

/// Routes websocket sessions to conversation and notification groups and
/// fans events out through the bus.
pub struct ChatServer {
    directory: ConversationDirectory,
    store: MessageStore,
    bus: Arc<dyn GroupBus>,
    accounts: Arc<dyn AccountDirectory>,
    statements: Arc<dyn StatementLookup>,
    identities: Arc<dyn IdentityResolver>,
    settings: Settings,
}

impl ChatServer {
    pub fn new(
        settings: Settings,
        accounts: Arc<dyn AccountDirectory>,
        statements: Arc<dyn StatementLookup>,
        identities: Arc<dyn IdentityResolver>,
    ) -> Self {
        ChatServer {
            directory: ConversationDirectory::new(Arc::new(MemoryPresence::default())),
            store: MessageStore::default(),
            bus: Arc::new(MemoryBus::default()),
            accounts,
            statements,
            identities,
            settings,
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn accounts(&self) -> &Arc<dyn AccountDirectory> {
        &self.accounts
    }

    /// A session bound to one conversation. An unauthenticated connection
    /// is accepted and then ignored: no group membership, no outbound
    /// events, inbound frames dropped on the floor.
    pub async fn handle_chat_socket(
        &self,
        ws: WebSocket,
        conversation_name: String,
        token: Option<String>,
    ) {
        let Some(account_id) = self.resolve_identity(token).await else {
            drain_unauthenticated(ws).await;
            return;
        };

        let (part_a, part_b) = match parse_participants(&conversation_name) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("{account_id} connected with bad conversation name {conversation_name}: {e}");
                let _ = ws.close().await;
                return;
            }
        };
        let conversation = match self.directory.get_or_create(&part_a, &part_b).await {
            Ok(conversation) => conversation,
            Err(e) => {
                warn!("conversation setup failed for {conversation_name}: {e}");
                let _ = ws.close().await;
                return;
            }
        };
        // the peer is whichever participant the caller is not
        let to_user = if part_a == account_id { part_b } else { part_a };

        let session_id = Uuid::new_v4().to_string();
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        self.bus
            .subscribe(&conversation.key, &session_id, tx.clone())
            .await;
        self.directory.join(&conversation.key, &account_id).await;
        info!(
            "{} joined {} ({} online)",
            account_id,
            conversation.key,
            self.directory.online(&conversation.key).await.len()
        );

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    debug!("failed to push websocket frame: {e}");
                    break;
                }
            }
        });

        self.send_snapshot(&conversation.key, &tx).await;

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(frame) => {
                    let Ok(text) = frame.to_str() else { continue };
                    match serde_json::from_str::<ClientEvent>(text) {
                        Ok(event) => {
                            self.handle_chat_event(
                                event,
                                &conversation.key,
                                &account_id,
                                &to_user,
                                &tx,
                            )
                            .await;
                        }
                        Err(e) => debug!("undecodable event from {account_id}: {e}"),
                    }
                }
                Err(e) => {
                    debug!("websocket error for {account_id}: {e}");
                    break;
                }
            }
        }

        self.bus
            .publish(
                &conversation.key,
                &ServerEvent::UserLeave {
                    user: account_id.clone(),
                },
            )
            .await;
        if self.settings.clear_presence_on_disconnect {
            self.directory.leave(&conversation.key, &account_id).await;
        }
        self.bus.drop_session(&session_id).await;
    }

    /// The account's private channel: joins its notification group and
    /// pushes the current unread count. Inbound frames are ignored.
    pub async fn handle_notification_socket(&self, ws: WebSocket, token: Option<String>) {
        let Some(account_id) = self.resolve_identity(token).await else {
            drain_unauthenticated(ws).await;
            return;
        };

        let session_id = Uuid::new_v4().to_string();
        let topic = notification_topic(&account_id);
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        self.bus.subscribe(&topic, &session_id, tx.clone()).await;

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    debug!("failed to push notification frame: {e}");
                    break;
                }
            }
        });

        let unread_count = self.store.count_unread(&account_id).await;
        send_event(&tx, &ServerEvent::UnreadCount { unread_count });

        while let Some(result) = ws_rx.next().await {
            if result.is_err() {
                break;
            }
        }

        self.bus.unsubscribe(&topic, &session_id).await;
    }

    async fn handle_chat_event(
        &self,
        event: ClientEvent,
        conversation_key: &str,
        from_user: &str,
        to_user: &str,
        tx: &EventSink,
    ) {
        match event {
            ClientEvent::ChatMessage { message, statement } => {
                let stored = match self
                    .store
                    .append(conversation_key, from_user, to_user, &message, statement)
                    .await
                {
                    Ok(stored) => stored,
                    Err(e) => {
                        warn!("rejected message from {from_user} in {conversation_key}: {e}");
                        send_event(
                            tx,
                            &ServerEvent::Error {
                                message: e.to_string(),
                            },
                        );
                        return;
                    }
                };

                // the append is durable before anything is fanned out
                let view = match self.render_message(&stored).await {
                    Ok(view) => view,
                    Err(e) => {
                        warn!("stored message {} cannot be rendered: {e}", stored.id);
                        send_event(
                            tx,
                            &ServerEvent::Error {
                                message: e.to_string(),
                            },
                        );
                        return;
                    }
                };

                self.bus
                    .publish(
                        conversation_key,
                        &ServerEvent::ChatMessageEcho {
                            name: from_user.to_string(),
                            message: view.clone(),
                        },
                    )
                    .await;

                let notify_target = if self.settings.notify_recipient_on_send {
                    to_user
                } else {
                    from_user
                };
                self.bus
                    .publish(
                        &notification_topic(notify_target),
                        &ServerEvent::NewMessageNotification {
                            name: from_user.to_string(),
                            message: view,
                        },
                    )
                    .await;
            }
            ClientEvent::ReadMessages => {
                self.store.mark_read(conversation_key, from_user).await;
                let unread_count = self.store.count_unread(from_user).await;
                self.bus
                    .publish(
                        &notification_topic(from_user),
                        &ServerEvent::UnreadCount { unread_count },
                    )
                    .await;
            }
        }
    }

    async fn send_snapshot(&self, conversation_key: &str, tx: &EventSink) {
        let recent = self.store.recent(conversation_key, SNAPSHOT_LIMIT).await;
        let mut messages = Vec::with_capacity(recent.len());
        for stored in &recent {
            match self.render_message(stored).await {
                Ok(view) => messages.push(view),
                Err(e) => warn!("dropping message {} from snapshot: {e}", stored.id),
            }
        }
        let has_more = self.store.count(conversation_key).await > HAS_MORE_THRESHOLD;
        send_event(tx, &ServerEvent::LastMessages { messages, has_more });
    }

    pub(crate) async fn render_message(
        &self,
        message: &StoredMessage,
    ) -> Result<MessageView, ChatError> {
        let from_user = self.accounts.account(&message.from_user).await?;
        let to_user = self.accounts.account(&message.to_user).await?;
        let statement = match message.statement {
            Some(id) => self.statements.statement(id).await,
            None => None,
        };
        Ok(MessageView {
            id: message.id.simple().to_string(),
            conversation: message.conversation.clone(),
            from_user,
            to_user,
            content: message.content.clone(),
            timestamp: message.timestamp,
            read: message.read,
            statement,
        })
    }

    async fn resolve_identity(&self, token: Option<String>) -> Option<String> {
        match token {
            Some(token) => self.identities.resolve(&token).await,
            None => None,
        }
    }
}

fn send_event(tx: &EventSink, event: &ServerEvent) {
    if let Ok(payload) = serde_json::to_string(event) {
        let _ = tx.send(Message::text(payload));
    }
}

/// Accepted at the transport level, never joined to a group: reads frames
/// until the peer goes away and answers nothing.
async fn drain_unauthenticated(ws: WebSocket) {
    let (_tx, mut rx) = ws.split();
    while let Some(result) = rx.next().await {
        if result.is_err() {
            break;
        }
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// All routes: the two websocket endpoints plus the REST read API.
pub fn routes(
    server: Arc<ChatServer>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let chat_server = server.clone();
    let chat = warp::path!("ws" / "chat" / String)
        .and(warp::ws())
        .and(warp::query::<TokenQuery>())
        .map(
            move |conversation_name: String, ws: warp::ws::Ws, query: TokenQuery| {
                let server = chat_server.clone();
                ws.on_upgrade(move |socket| async move {
                    server
                        .handle_chat_socket(socket, conversation_name, query.token)
                        .await;
                })
            },
        );

    let notification_server = server.clone();
    let notifications = warp::path!("ws" / "notifications")
        .and(warp::ws())
        .and(warp::query::<TokenQuery>())
        .map(move |ws: warp::ws::Ws, query: TokenQuery| {
            let server = notification_server.clone();
            ws.on_upgrade(move |socket| async move {
                server.handle_notification_socket(socket, query.token).await;
            })
        });

    chat.or(notifications).or(crate::api::filters(server))
}
