use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An OAuth-style bearer credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token_type: String,
    pub access_token: String,
}

impl Token {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            token_type: "Bearer".to_string(),
            access_token: access_token.into(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Source of tokens. Acquisition, caching and refresh are the provider's business;
/// the channels call `get` once per request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get(&self) -> anyhow::Result<Token>;
}

/// Always hands out the same token.
#[derive(Clone, Debug)]
pub struct StaticToken(Token);

impl StaticToken {
    pub fn new(token: Token) -> Self {
        Self(token)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn get(&self) -> anyhow::Result<Token> {
        Ok(self.0.clone())
    }
}
