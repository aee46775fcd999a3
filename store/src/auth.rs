use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{StoreError, StoreResult},
    Store,
};

/// Which provider family a stored token belongs to. Each family keeps its
/// own table; tokens are never shared across users.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum TokenKind {
    Google,
    Shopify,
    Quickbooks,
}

impl TokenKind {
    fn table(&self) -> &'static str {
        match self {
            TokenKind::Google => "google_auth_storages",
            TokenKind::Shopify => "shopify_auth_storages",
            TokenKind::Quickbooks => "quickbooks_auth_storages",
        }
    }
}

/// Mapping from an opaque cookie/JWT value to a provider token.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AuthToken {
    pub id: i64,
    pub cookie: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Store (or replace) the token behind a cookie value.
    pub async fn put_token(
        &self,
        kind: TokenKind,
        cookie: &str,
        token: &str,
    ) -> StoreResult<()> {
        let query = format!(
            r#"
            INSERT INTO {} (cookie, token)
            VALUES ($1, $2)
            ON CONFLICT (cookie) DO UPDATE SET token = EXCLUDED.token
            "#,
            kind.table()
        );
        sqlx::query(&query)
            .bind(cookie)
            .bind(token)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn token_by_cookie(&self, kind: TokenKind, cookie: &str) -> StoreResult<String> {
        let query = format!("SELECT * FROM {} WHERE cookie = $1", kind.table());
        let row = sqlx::query_as::<_, AuthToken>(&query)
            .bind(cookie)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound("no token for cookie".into()))?;
        Ok(row.token)
    }

    pub async fn delete_token(&self, kind: TokenKind, cookie: &str) -> StoreResult<()> {
        let query = format!("DELETE FROM {} WHERE cookie = $1", kind.table());
        sqlx::query(&query)
            .bind(cookie)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
