use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use market_chat::config::Settings;
use market_chat::directory::{AccountKind, AccountView, MemoryAccounts, MemoryStatements, TokenTable};
use market_chat::server::{routes, ChatServer};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn account(id: &str, kind: AccountKind) -> AccountView {
    AccountView {
        id: id.to_string(),
        full_name: Some(format!("Account {id}")),
        kind,
        provider_name: None,
        courier_company_name: None,
        avatar: None,
        average_rating: None,
        ratings_count: 0,
    }
}

async fn recv_event(socket: &mut Socket) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("event within deadline")
            .expect("open socket")
            .expect("frame");
        if let Ok(text) = frame.to_text() {
            if !text.is_empty() {
                return serde_json::from_str(text).expect("json event");
            }
        }
    }
}

#[tokio::test]
async fn conversation_round_trip_over_a_real_socket() {
    let accounts = Arc::new(MemoryAccounts::default());
    accounts.insert(account("a", AccountKind::Client)).await;
    accounts.insert(account("b", AccountKind::Master)).await;
    let tokens = Arc::new(TokenTable::default());
    let token_a = tokens.mint("a").await;
    let token_b = tokens.mint("b").await;

    let server = Arc::new(ChatServer::new(
        Settings::default(),
        accounts,
        Arc::new(MemoryStatements::default()),
        tokens,
    ));

    let (addr, serving) = warp::serve(routes(server)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serving);

    let (mut alice, _) = connect_async(format!("ws://{addr}/ws/chat/a__b?token={token_a}"))
        .await
        .expect("connect a");
    let snapshot = recv_event(&mut alice).await;
    assert_eq!(snapshot["type"], "last_50_messages");
    assert_eq!(snapshot["has_more"], false);

    let (mut bob, _) = connect_async(format!("ws://{addr}/ws/chat/b__a?token={token_b}"))
        .await
        .expect("connect b");
    recv_event(&mut bob).await;

    alice
        .send(Message::Text(
            r#"{"type": "chat_message", "message": "hello over tcp"}"#.into(),
        ))
        .await
        .expect("send");

    let echo = recv_event(&mut bob).await;
    assert_eq!(echo["type"], "chat_message_echo");
    assert_eq!(echo["name"], "a");
    assert_eq!(echo["message"]["content"], "hello over tcp");
    assert_eq!(echo["message"]["conversation"], "a__b");

    let own_echo = recv_event(&mut alice).await;
    assert_eq!(own_echo["type"], "chat_message_echo");

    alice.close(None).await.expect("close");
    let leave = recv_event(&mut bob).await;
    assert_eq!(leave["type"], "user_leave");
    assert_eq!(leave["user"], "a");
}
