use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use storx_backup_lib::{ProcessorError, ProcessorResult};

use crate::{
    adapter::{FetchedItem, ItemPage, SourceAdapter, SourceItem, UserIdentity},
    config::ClientPair,
    google::{http_client, refresh_access_token, required_field},
};

const API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail source. Messages are stored as the provider's raw message JSON;
/// the enumerate step resolves each message's subject so the destination
/// key can be computed before fetching bodies.
pub struct GmailAdapter {
    http: Client,
    access_token: String,
}

impl GmailAdapter {
    pub async fn connect(keys: &ClientPair, input_data: &Value) -> ProcessorResult<Self> {
        let refresh_token = required_field(input_data, "refresh_token")?;
        let http = http_client()?;
        let access_token = refresh_access_token(&http, keys, &refresh_token).await?;
        Ok(Self { http, access_token })
    }

    async fn get_json(&self, url: &str) -> ProcessorResult<Value> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("gmail: {e}")))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "gmail returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ProcessorError::Internal(format!("gmail body: {e}")))
    }
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

pub(crate) fn subject_of(message: &Value) -> String {
    message["payload"]["headers"]
        .as_array()
        .and_then(|headers| {
            headers.iter().find(|h| {
                h["name"]
                    .as_str()
                    .is_some_and(|name| name.eq_ignore_ascii_case("subject"))
            })
        })
        .and_then(|h| h["value"].as_str())
        .unwrap_or("")
        .to_string()
}

#[async_trait]
impl SourceAdapter for GmailAdapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        let profile = self.get_json(&format!("{API}/profile")).await?;
        let email = profile["emailAddress"].as_str().unwrap_or("").to_string();
        Ok(UserIdentity {
            display_name: email.clone(),
            email,
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        filter: Option<&str>,
        limit: usize,
    ) -> ProcessorResult<ItemPage> {
        let mut url = format!("{API}/messages?maxResults={limit}");
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={token}"));
        }
        if let Some(query) = filter {
            url.push_str(&format!("&q={}", urlencode(query)));
        }
        let list: MessageList = serde_json::from_value(self.get_json(&url).await?)
            .map_err(|e| ProcessorError::Internal(format!("gmail list: {e}")))?;

        let mut items = Vec::with_capacity(list.messages.len());
        for reference in list.messages {
            let meta = self
                .get_json(&format!(
                    "{API}/messages/{}?format=metadata&metadataHeaders=Subject",
                    reference.id
                ))
                .await?;
            items.push(SourceItem {
                name: subject_of(&meta),
                id: reference.id,
                mime_type: Some("application/json".to_string()),
                meta,
            });
        }
        Ok(ItemPage {
            items,
            next_page_token: list.next_page_token,
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        let message = self
            .get_json(&format!("{API}/messages/{item_id}?format=full"))
            .await?;
        let bytes = serde_json::to_vec(&message)
            .map_err(|e| ProcessorError::Internal(format!("gmail message: {e}")))?;
        Ok(FetchedItem {
            bytes,
            content_type: "application/json".to_string(),
            meta: message,
        })
    }

    async fn insert(&self, payload: &[u8], _name: &str) -> ProcessorResult<String> {
        let raw = URL_SAFE_NO_PAD.encode(payload);
        let response = self
            .http
            .post(format!("{API}/messages/import"))
            .bearer_auth(&self.access_token)
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("gmail import: {e}")))?;
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "gmail import returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProcessorError::Internal(format!("gmail import body: {e}")))?;
        Ok(body["id"].as_str().unwrap_or("").to_string())
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_header_is_case_insensitive() {
        let message = json!({
            "payload": { "headers": [
                { "name": "SUBJECT", "value": "Quarterly report" },
                { "name": "From", "value": "a@x" }
            ]}
        });
        assert_eq!(subject_of(&message), "Quarterly report");
    }

    #[test]
    fn missing_subject_is_empty() {
        let message = json!({ "payload": { "headers": [] } });
        assert_eq!(subject_of(&message), "");
    }
}
