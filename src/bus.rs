use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

use crate::events::ServerEvent;

pub type EventSink = mpsc::UnboundedSender<Message>;

/// Group-based fan-out: sessions subscribe to named topics, publishes go to
/// every subscribed session. The in-process implementation below serves a
/// single server; a broker-backed implementation can replace it behind this
/// trait when sessions are spread over several processes.
#[async_trait]
pub trait GroupBus: Send + Sync {
    async fn subscribe(&self, topic: &str, session: &str, sink: EventSink);
    async fn unsubscribe(&self, topic: &str, session: &str);
    /// Removes the session from every topic it subscribed to.
    async fn drop_session(&self, session: &str);
    async fn publish(&self, topic: &str, event: &ServerEvent);
}

#[derive(Default)]
pub struct MemoryBus {
    groups: RwLock<HashMap<String, HashMap<String, EventSink>>>,
}

#[async_trait]
impl GroupBus for MemoryBus {
    async fn subscribe(&self, topic: &str, session: &str, sink: EventSink) {
        let mut groups = self.groups.write().await;
        groups
            .entry(topic.to_string())
            .or_default()
            .insert(session.to_string(), sink);
    }

    async fn unsubscribe(&self, topic: &str, session: &str) {
        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(topic) {
            members.remove(session);
            if members.is_empty() {
                groups.remove(topic);
            }
        }
    }

    async fn drop_session(&self, session: &str) {
        let mut groups = self.groups.write().await;
        groups.retain(|_, members| {
            members.remove(session);
            !members.is_empty()
        });
    }

    async fn publish(&self, topic: &str, event: &ServerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("failed to serialize event for {topic}: {e}");
                return;
            }
        };

        let groups = self.groups.read().await;
        if let Some(members) = groups.get(topic) {
            for sink in members.values() {
                // a closed sink means the session is going away; its
                // disconnect path cleans up the subscription
                let _ = sink.send(Message::text(payload.clone()));
            }
        }
    }
}
