use std::sync::Arc;

use serde_json::Value;

use market_chat::config::Settings;
use market_chat::directory::{AccountKind, AccountView, MemoryAccounts, MemoryStatements, TokenTable};
use market_chat::server::{routes, ChatServer};

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

async fn server() -> Arc<ChatServer> {
    let accounts = Arc::new(MemoryAccounts::default());
    accounts.insert(account("a", AccountKind::Client)).await;
    accounts.insert(account("b", AccountKind::Provider)).await;
    accounts.insert(account("c", AccountKind::Courier)).await;
    Arc::new(ChatServer::new(
        Settings::default(),
        accounts,
        Arc::new(MemoryStatements::default()),
        Arc::new(TokenTable::default()),
    ))
}

async fn get(server: &Arc<ChatServer>, path: &str) -> (u16, Value) {
    let response = warp::test::request()
        .method("GET")
        .path(path)
        .reply(&routes(server.clone()))
        .await;
    let status = response.status().as_u16();
    let body = serde_json::from_slice(response.body()).expect("json body");
    (status, body)
}

#[tokio::test]
async fn conversations_list_the_peer_and_the_latest_message() {
    let server = server().await;
    server
        .store()
        .append("a__b", "a", "b", "first", None)
        .await
        .expect("seed");
    server
        .store()
        .append("a__b", "b", "a", "latest", None)
        .await
        .expect("seed");
    server
        .store()
        .append("b__c", "c", "b", "elsewhere", None)
        .await
        .expect("seed");

    let (status, body) = get(&server, "/api/conversations?current_account=a").await;
    assert_eq!(status, 200);
    let entries = body.as_array().expect("array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["name"], "a__b");
    assert_eq!(entries[0]["other_user"]["id"], "b");
    assert_eq!(entries[0]["last_message"]["content"], "latest");

    let (_, body) = get(&server, "/api/conversations?current_account=b").await;
    let entries = body.as_array().expect("array");
    assert_eq!(entries.len(), 2);

    let (_, body) = get(&server, "/api/conversations?current_account=c").await;
    assert_eq!(body.as_array().expect("array").len(), 1);
}

#[tokio::test]
async fn messages_page_newest_first_with_limit_and_offset() {
    let server = server().await;
    for i in 0..6 {
        server
            .store()
            .append("a__b", "a", "b", &format!("m{i}"), None)
            .await
            .expect("seed");
    }

    let (status, body) = get(&server, "/api/messages?conversation=a__b&limit=2&offset=1").await;
    assert_eq!(status, 200);
    assert_eq!(body["count"], 6);
    let results = body["results"].as_array().expect("results");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["content"], "m4");
    assert_eq!(results[1]["content"], "m3");
}

#[tokio::test]
async fn message_history_accepts_either_participant_order() {
    let server = server().await;
    server
        .store()
        .append("a__b", "a", "b", "hello", None)
        .await
        .expect("seed");

    let (_, forward) = get(&server, "/api/messages?conversation=a__b").await;
    let (_, backward) = get(&server, "/api/messages?conversation=b__a").await;
    assert_eq!(forward["count"], 1);
    assert_eq!(backward["count"], 1);
    assert_eq!(
        forward["results"][0]["id"], backward["results"][0]["id"],
        "both orders must read the same log"
    );
}

#[tokio::test]
async fn malformed_conversation_names_are_rejected() {
    let server = server().await;
    let (status, body) = get(&server, "/api/messages?conversation=solo").await;
    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    let (status, _) = get(&server, "/api/messages?conversation=a__a").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn unknown_conversations_page_empty() {
    let server = server().await;
    let (status, body) = get(&server, "/api/messages?conversation=a__b").await;
    assert_eq!(status, 200);
    assert_eq!(body["count"], 0);
    assert_eq!(body["results"].as_array().expect("results").len(), 0);
}
