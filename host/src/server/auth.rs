use axum::{extract::FromRequestParts, http::request::Parts};
use storx_backup_satellite::AccessGrant;

use crate::error::HostError;

pub const ACCESS_TOKEN_HEADER: &str = "ACCESS_TOKEN";

/// Extractor for the `ACCESS_TOKEN` header carried by every mutating
/// request: the raw satellite access grant plus the project id it is
/// scoped to, which serves as the caller's user id.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub grant: String,
    pub user_id: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AccessToken
where
    S: Send + Sync,
{
    type Rejection = HostError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACCESS_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(HostError::MissingAccessToken)?;

        let grant = AccessGrant::parse(raw)
            .map_err(|e| HostError::Unauthorized(format!("bad access grant: {e}")))?;
        if grant.project_id.is_empty() {
            return Err(HostError::Unauthorized(
                "access grant carries no project id".to_string(),
            ));
        }
        Ok(AccessToken {
            grant: raw.to_string(),
            user_id: grant.project_id,
        })
    }
}
