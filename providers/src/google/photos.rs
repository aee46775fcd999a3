use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use storx_backup_lib::{ProcessorError, ProcessorResult};

use crate::{
    adapter::{FetchedItem, ItemPage, SourceAdapter, SourceItem, UserIdentity},
    config::ClientPair,
    google::{http_client, refresh_access_token, required_field},
};

const API: &str = "https://photoslibrary.googleapis.com/v1";
const ALBUM_PAGE_SIZE: usize = 100;

/// A photo's album context, when it is processed as part of an album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRef {
    pub id: String,
    pub title: String,
}

/// Google Photos source. `baseUrl`s are short-lived, so `fetch` re-reads
/// the media item and appends `=d` to force the full-resolution binary.
pub struct PhotosAdapter {
    http: Client,
    access_token: String,
}

impl PhotosAdapter {
    pub async fn connect(keys: &ClientPair, input_data: &Value) -> ProcessorResult<Self> {
        let refresh_token = required_field(input_data, "refresh_token")?;
        let http = http_client()?;
        let access_token = refresh_access_token(&http, keys, &refresh_token).await?;
        Ok(Self { http, access_token })
    }

    async fn request_json(
        &self,
        request: reqwest::RequestBuilder,
    ) -> ProcessorResult<Value> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("photos: {e}")))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorError::AuthExpired);
        }
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProcessorError::Internal("photos: not found".to_string()));
        }
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "photos returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ProcessorError::Internal(format!("photos body: {e}")))
    }

    /// Whether an id from a scheduled cohort names an album rather than a
    /// single media item.
    pub async fn album(&self, id: &str) -> ProcessorResult<Option<AlbumRef>> {
        let response = self
            .http
            .get(format!("{API}/albums/{id}"))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("photos album: {e}")))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorError::AuthExpired);
        }
        if !response.status().is_success() {
            return Ok(None);
        }
        let album: Value = response
            .json()
            .await
            .map_err(|e| ProcessorError::Internal(format!("photos album body: {e}")))?;
        Ok(Some(AlbumRef {
            id: album["id"].as_str().unwrap_or(id).to_string(),
            title: album["title"].as_str().unwrap_or("album").to_string(),
        }))
    }

    /// Page through an album's media ids, 100 per page.
    pub async fn album_media_ids(&self, album_id: &str) -> ProcessorResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut body = json!({
                "albumId": album_id,
                "pageSize": ALBUM_PAGE_SIZE,
            });
            if let Some(token) = &page_token {
                body["pageToken"] = json!(token);
            }
            let page = self
                .request_json(self.http.post(format!("{API}/mediaItems:search")).json(&body))
                .await?;
            if let Some(items) = page["mediaItems"].as_array() {
                ids.extend(
                    items
                        .iter()
                        .filter_map(|item| item["id"].as_str().map(str::to_string)),
                );
            }
            match page["nextPageToken"].as_str() {
                Some(token) => page_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(ids)
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MediaItemList {
    #[serde(default)]
    media_items: Vec<Value>,
    next_page_token: Option<String>,
}

#[async_trait]
impl SourceAdapter for PhotosAdapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        let info = self
            .request_json(
                self.http
                    .get("https://www.googleapis.com/oauth2/v3/userinfo"),
            )
            .await?;
        Ok(UserIdentity {
            email: info["email"].as_str().unwrap_or("").to_string(),
            display_name: info["name"].as_str().unwrap_or("").to_string(),
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        _filter: Option<&str>,
        limit: usize,
    ) -> ProcessorResult<ItemPage> {
        let mut url = format!("{API}/mediaItems?pageSize={limit}");
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={token}"));
        }
        let list: MediaItemList =
            serde_json::from_value(self.request_json(self.http.get(url)).await?)
                .map_err(|e| ProcessorError::Internal(format!("photos list: {e}")))?;
        let items = list
            .media_items
            .into_iter()
            .map(|item| SourceItem {
                id: item["id"].as_str().unwrap_or("").to_string(),
                name: item["filename"].as_str().unwrap_or("media").to_string(),
                mime_type: item["mimeType"].as_str().map(str::to_string),
                meta: item,
            })
            .collect();
        Ok(ItemPage {
            items,
            next_page_token: list.next_page_token,
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        let item = self
            .request_json(self.http.get(format!("{API}/mediaItems/{item_id}")))
            .await?;
        let base_url = item["baseUrl"]
            .as_str()
            .ok_or_else(|| ProcessorError::Internal("photos: no baseUrl".to_string()))?;

        // `=d` forces the original binary instead of a scaled preview
        let response = self
            .http
            .get(format!("{base_url}=d"))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("photos download: {e}")))?;
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "photos download returned {}",
                response.status()
            )));
        }
        let content_type = item["mimeType"].as_str().unwrap_or("application/octet-stream").to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProcessorError::Internal(format!("photos download: {e}")))?
            .to_vec();
        Ok(FetchedItem {
            bytes,
            content_type,
            meta: item,
        })
    }

    async fn insert(&self, _payload: &[u8], _name: &str) -> ProcessorResult<String> {
        // Photos uploads need a two-phase upload-token dance that restore
        // does not use yet.
        Err(ProcessorError::Internal(
            "photos restore is not supported".to_string(),
        ))
    }
}
