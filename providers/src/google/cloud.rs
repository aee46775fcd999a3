use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use storx_backup_lib::{ProcessorError, ProcessorResult};

use crate::{
    adapter::{FetchedItem, ItemPage, SourceAdapter, SourceItem, UserIdentity},
    config::ClientPair,
    google::{http_client, refresh_access_token, required_field},
};

const API: &str = "https://storage.googleapis.com/storage/v1";

/// Google Cloud Storage source: mirrors one GCS bucket named in the job's
/// `input_data`.
pub struct GoogleCloudAdapter {
    http: Client,
    access_token: String,
    bucket: String,
}

impl GoogleCloudAdapter {
    pub async fn connect(keys: &ClientPair, input_data: &Value) -> ProcessorResult<Self> {
        let refresh_token = required_field(input_data, "refresh_token")?;
        let bucket = required_field(input_data, "bucket_name")?;
        let http = http_client()?;
        let access_token = refresh_access_token(&http, keys, &refresh_token).await?;
        Ok(Self {
            http,
            access_token,
            bucket,
        })
    }

    async fn get(&self, url: &str) -> ProcessorResult<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("gcs: {e}")))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "gcs returned {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<Value>,
    next_page_token: Option<String>,
}

#[async_trait]
impl SourceAdapter for GoogleCloudAdapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        let info = self
            .get("https://www.googleapis.com/oauth2/v3/userinfo")
            .await?
            .json::<Value>()
            .await
            .map_err(|e| ProcessorError::Internal(format!("gcs identity: {e}")))?;
        Ok(UserIdentity {
            email: info["email"].as_str().unwrap_or("").to_string(),
            display_name: info["name"].as_str().unwrap_or("").to_string(),
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        filter: Option<&str>,
        limit: usize,
    ) -> ProcessorResult<ItemPage> {
        let mut url = format!("{API}/b/{}/o?maxResults={limit}", self.bucket);
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={token}"));
        }
        if let Some(prefix) = filter {
            url.push_str(&format!(
                "&prefix={}",
                url::form_urlencoded::byte_serialize(prefix.as_bytes()).collect::<String>()
            ));
        }
        let list: ObjectList = self
            .get(&url)
            .await?
            .json()
            .await
            .map_err(|e| ProcessorError::Internal(format!("gcs list: {e}")))?;
        let items = list
            .items
            .into_iter()
            .map(|object| SourceItem {
                id: object["name"].as_str().unwrap_or("").to_string(),
                name: object["name"].as_str().unwrap_or("object").to_string(),
                mime_type: object["contentType"].as_str().map(str::to_string),
                meta: object,
            })
            .collect();
        Ok(ItemPage {
            items,
            next_page_token: list.next_page_token,
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        let encoded: String = url::form_urlencoded::byte_serialize(item_id.as_bytes()).collect();
        let response = self
            .get(&format!("{API}/b/{}/o/{encoded}?alt=media", self.bucket))
            .await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProcessorError::Internal(format!("gcs download: {e}")))?
            .to_vec();
        Ok(FetchedItem {
            bytes,
            content_type,
            meta: Value::Null,
        })
    }

    async fn insert(&self, payload: &[u8], name: &str) -> ProcessorResult<String> {
        let encoded: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
        let response = self
            .http
            .post(format!(
                "https://storage.googleapis.com/upload/storage/v1/b/{}/o?uploadType=media&name={encoded}",
                self.bucket
            ))
            .bearer_auth(&self.access_token)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("gcs upload: {e}")))?;
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "gcs upload returned {}",
                response.status()
            )));
        }
        Ok(name.to_string())
    }
}
