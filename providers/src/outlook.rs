use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use storx_backup_lib::{ProcessorError, ProcessorResult};

use crate::{
    adapter::{FetchedItem, ItemPage, SourceAdapter, SourceItem, UserIdentity},
    config::ClientPair,
    google::{http_client, required_field},
};

const TOKEN_ENDPOINT: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const API: &str = "https://graph.microsoft.com/v1.0";

/// Outlook source via Microsoft Graph. Pagination follows Graph's
/// `@odata.nextLink` convention, so the page token is a full URL.
pub struct OutlookAdapter {
    http: Client,
    access_token: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl OutlookAdapter {
    pub async fn connect(keys: &ClientPair, input_data: &Value) -> ProcessorResult<Self> {
        let refresh_token = required_field(input_data, "refresh_token")?;
        let http = http_client()?;

        let response = http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("client_id", keys.client_id.as_str()),
                ("client_secret", keys.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
                ("scope", "https://graph.microsoft.com/.default"),
            ])
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("graph token: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if body.contains("invalid_grant") {
                return Err(ProcessorError::AuthExpired);
            }
            return Err(ProcessorError::AuthConfig(format!(
                "graph token endpoint returned {status}"
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProcessorError::AuthConfig(format!("graph token body: {e}")))?;
        Ok(Self {
            http,
            access_token: token.access_token,
        })
    }

    async fn get_json(&self, url: &str) -> ProcessorResult<Value> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("graph: {e}")))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "graph returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ProcessorError::Internal(format!("graph body: {e}")))
    }
}

#[async_trait]
impl SourceAdapter for OutlookAdapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        let me = self.get_json(&format!("{API}/me")).await?;
        let email = me["mail"]
            .as_str()
            .or_else(|| me["userPrincipalName"].as_str())
            .unwrap_or("")
            .to_string();
        Ok(UserIdentity {
            email,
            display_name: me["displayName"].as_str().unwrap_or("").to_string(),
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        filter: Option<&str>,
        limit: usize,
    ) -> ProcessorResult<ItemPage> {
        let url = match page_token {
            Some(next_link) => next_link.to_string(),
            None => {
                let mut url = format!("{API}/me/messages?$top={limit}&$select=id,subject");
                if let Some(query) = filter {
                    url.push_str(&format!(
                        "&$filter={}",
                        url::form_urlencoded::byte_serialize(query.as_bytes())
                            .collect::<String>()
                    ));
                }
                url
            }
        };
        let page = self.get_json(&url).await?;
        let items = page["value"]
            .as_array()
            .map(|messages| {
                messages
                    .iter()
                    .map(|message| SourceItem {
                        id: message["id"].as_str().unwrap_or("").to_string(),
                        name: message["subject"].as_str().unwrap_or("").to_string(),
                        mime_type: Some("application/json".to_string()),
                        meta: message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ItemPage {
            items,
            next_page_token: page["@odata.nextLink"].as_str().map(str::to_string),
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        let message = self.get_json(&format!("{API}/me/messages/{item_id}")).await?;
        let bytes = serde_json::to_vec(&message)
            .map_err(|e| ProcessorError::Internal(format!("graph message: {e}")))?;
        Ok(FetchedItem {
            bytes,
            content_type: "application/json".to_string(),
            meta: message,
        })
    }

    async fn insert(&self, payload: &[u8], _name: &str) -> ProcessorResult<String> {
        let message: Value = serde_json::from_slice(payload)
            .map_err(|e| ProcessorError::Internal(format!("graph restore body: {e}")))?;
        let response = self
            .http
            .post(format!("{API}/me/messages"))
            .bearer_auth(&self.access_token)
            .json(&message)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("graph restore: {e}")))?;
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "graph restore returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProcessorError::Internal(format!("graph restore body: {e}")))?;
        Ok(body["id"].as_str().unwrap_or("").to_string())
    }
}
