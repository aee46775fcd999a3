use reqwest::Client;
use serde::Deserialize;
use storx_backup_lib::{consts::SOURCE_HTTP_TIMEOUT, ProcessorError, ProcessorResult};

use crate::config::ClientPair;

pub mod cloud;
pub mod drive;
pub mod gmail;
pub mod photos;

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// HTTP client for source adapters; every call carries the 30 s timeout.
pub(crate) fn http_client() -> ProcessorResult<Client> {
    Client::builder()
        .timeout(SOURCE_HTTP_TIMEOUT)
        .build()
        .map_err(|e| ProcessorError::Internal(format!("http client: {e}")))
}

/// Pull a non-empty string field out of the job's `input_data`.
pub(crate) fn required_field(input: &serde_json::Value, field: &str) -> ProcessorResult<String> {
    input
        .get(field)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProcessorError::AuthConfig(format!("missing {field}")))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize, Default)]
struct TokenError {
    #[serde(default)]
    error: String,
}

/// Exchange a refresh token for a short-lived access token. A rejected
/// grant maps onto the `AuthExpired` sentinel so the dispatcher can mark
/// the job "token expired" instead of retrying.
pub(crate) async fn refresh_access_token(
    http: &Client,
    keys: &ClientPair,
    refresh_token: &str,
) -> ProcessorResult<String> {
    let response = http
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("client_id", keys.client_id.as_str()),
            ("client_secret", keys.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await
        .map_err(|e| ProcessorError::Internal(format!("token exchange: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body: TokenError = response.json().await.unwrap_or_default();
        if body.error == "invalid_grant" {
            return Err(ProcessorError::AuthExpired);
        }
        return Err(ProcessorError::AuthConfig(format!(
            "token endpoint returned {status}: {}",
            body.error
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| ProcessorError::AuthConfig(format!("token response: {e}")))?;
    Ok(token.access_token)
}
