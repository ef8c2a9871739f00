use std::collections::HashMap;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::ChatError;

/// Marketplace account roles, wire-encoded as the three-letter codes the
/// rest of the platform uses.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountKind {
    #[serde(rename = "CLI")]
    Client,
    #[serde(rename = "PRO")]
    Provider,
    #[serde(rename = "COU")]
    Courier,
    #[serde(rename = "MAS")]
    Master,
}

/// The account summary embedded in message payloads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AccountView {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: AccountKind,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub courier_company_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub average_rating: Option<f64>,
    #[serde(default)]
    pub ratings_count: u32,
}

/// The statement (service request) summary attached to messages that were
/// started from a request or a bid on one.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StatementView {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub work_detail: Option<String>,
    pub account: AccountView,
}

/// Account lookup-by-id, served elsewhere in the platform.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn account(&self, id: &str) -> Result<AccountView, ChatError>;
}

/// Statement lookup for messages that reference one.
#[async_trait]
pub trait StatementLookup: Send + Sync {
    async fn statement(&self, id: i64) -> Option<StatementView>;
}

/// Resolves the opaque handshake token to an account identity. Issuing
/// tokens is someone else's job; this side only answers "whose is it".
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<String>;
}

#[derive(Default)]
pub struct MemoryAccounts {
    accounts: RwLock<HashMap<String, AccountView>>,
}

impl MemoryAccounts {
    pub async fn insert(&self, account: AccountView) {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.id.clone(), account);
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccounts {
    async fn account(&self, id: &str) -> Result<AccountView, ChatError> {
        let accounts = self.accounts.read().await;
        accounts
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(id.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryStatements {
    statements: RwLock<HashMap<i64, StatementView>>,
}

impl MemoryStatements {
    pub async fn insert(&self, statement: StatementView) {
        let mut statements = self.statements.write().await;
        statements.insert(statement.id, statement);
    }
}

#[async_trait]
impl StatementLookup for MemoryStatements {
    async fn statement(&self, id: i64) -> Option<StatementView> {
        let statements = self.statements.read().await;
        statements.get(&id).cloned()
    }
}

/// Token table keyed by digest, so raw tokens never sit in memory longer
/// than a lookup.
#[derive(Default)]
pub struct TokenTable {
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenTable {
    pub async fn grant(&self, token: &str, account: &str) {
        let mut tokens = self.tokens.write().await;
        tokens.insert(digest(token), account.to_string());
    }

    /// Mints a fresh random token for the account and returns it.
    pub async fn mint(&self, account: &str) -> String {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        self.grant(&token, account).await;
        token
    }
}

#[async_trait]
impl IdentityResolver for TokenTable {
    async fn resolve(&self, token: &str) -> Option<String> {
        let tokens = self.tokens.read().await;
        tokens.get(&digest(token)).cloned()
    }
}

fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Seed data for the in-memory collaborators, so the binary runs without
/// the surrounding platform services.
#[derive(Deserialize, Default)]
pub struct Fixtures {
    #[serde(default)]
    pub accounts: Vec<AccountView>,
    #[serde(default)]
    pub tokens: Vec<TokenGrant>,
    #[serde(default)]
    pub statements: Vec<StatementFixture>,
}

#[derive(Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub account: String,
}

#[derive(Deserialize)]
pub struct StatementFixture {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub work_detail: Option<String>,
    pub account: String,
}

impl Fixtures {
    pub fn load(path: impl AsRef<Path>) -> io::Result<Fixtures> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub async fn apply(
        self,
        accounts: &MemoryAccounts,
        statements: &MemoryStatements,
        tokens: &TokenTable,
    ) {
        let by_id: HashMap<String, AccountView> = self
            .accounts
            .iter()
            .map(|a| (a.id.clone(), a.clone()))
            .collect();

        for account in self.accounts {
            accounts.insert(account).await;
        }
        for grant in self.tokens {
            tokens.grant(&grant.token, &grant.account).await;
        }
        for fixture in self.statements {
            match by_id.get(&fixture.account) {
                Some(account) => {
                    statements
                        .insert(StatementView {
                            id: fixture.id,
                            kind: fixture.kind,
                            work_detail: fixture.work_detail,
                            account: account.clone(),
                        })
                        .await;
                }
                None => log::warn!(
                    "statement fixture {} references unknown account {}",
                    fixture.id,
                    fixture.account
                ),
            }
        }
    }
}
