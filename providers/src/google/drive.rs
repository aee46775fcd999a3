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

const API: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";

/// Workspace-native files cannot be downloaded as-is; they are exported to
/// an Office-equivalent format. Anything else streams as binary.
pub fn export_mime_for(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "application/vnd.google-apps.document" => {
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        }
        "application/vnd.google-apps.spreadsheet" => {
            Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
        }
        "application/vnd.google-apps.presentation" => {
            Some("application/vnd.openxmlformats-officedocument.presentationml.presentation")
        }
        "application/vnd.google-apps.site" => Some("text/plain"),
        "application/vnd.google-apps.script" => Some("application/vnd.google-apps.script+json"),
        _ => None,
    }
}

/// Google Drive source. Each item carries its Drive metadata so the
/// processor can write the `<path>.metadata.json` sidecar next to the
/// content.
pub struct DriveAdapter {
    http: Client,
    access_token: String,
}

impl DriveAdapter {
    pub async fn connect(keys: &ClientPair, input_data: &Value) -> ProcessorResult<Self> {
        let refresh_token = required_field(input_data, "refresh_token")?;
        let http = http_client()?;
        let access_token = refresh_access_token(&http, keys, &refresh_token).await?;
        Ok(Self { http, access_token })
    }

    async fn get(&self, url: &str) -> ProcessorResult<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("drive: {e}")))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "drive returned {}",
                response.status()
            )));
        }
        Ok(response)
    }

    async fn get_json(&self, url: &str) -> ProcessorResult<Value> {
        self.get(url)
            .await?
            .json()
            .await
            .map_err(|e| ProcessorError::Internal(format!("drive body: {e}")))
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<Value>,
    next_page_token: Option<String>,
}

#[async_trait]
impl SourceAdapter for DriveAdapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        let about = self.get_json(&format!("{API}/about?fields=user")).await?;
        Ok(UserIdentity {
            email: about["user"]["emailAddress"].as_str().unwrap_or("").to_string(),
            display_name: about["user"]["displayName"].as_str().unwrap_or("").to_string(),
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        filter: Option<&str>,
        limit: usize,
    ) -> ProcessorResult<ItemPage> {
        let mut url = format!(
            "{API}/files?pageSize={limit}\
             &fields=nextPageToken,files(id,name,mimeType,size,modifiedTime,parents)"
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={token}"));
        }
        if let Some(query) = filter {
            url.push_str(&format!(
                "&q={}",
                url::form_urlencoded::byte_serialize(query.as_bytes()).collect::<String>()
            ));
        }
        let list: FileList = serde_json::from_value(self.get_json(&url).await?)
            .map_err(|e| ProcessorError::Internal(format!("drive list: {e}")))?;

        let items = list
            .files
            .into_iter()
            .filter(|file| {
                // folders hold no bytes of their own
                file["mimeType"].as_str() != Some("application/vnd.google-apps.folder")
            })
            .map(|file| SourceItem {
                id: file["id"].as_str().unwrap_or("").to_string(),
                name: file["name"].as_str().unwrap_or("unnamed").to_string(),
                mime_type: file["mimeType"].as_str().map(str::to_string),
                meta: file,
            })
            .collect();
        Ok(ItemPage {
            items,
            next_page_token: list.next_page_token,
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        let meta = self
            .get_json(&format!(
                "{API}/files/{item_id}?fields=id,name,mimeType,size,modifiedTime,parents"
            ))
            .await?;
        let mime_type = meta["mimeType"].as_str().unwrap_or("").to_string();

        let (url, content_type) = match export_mime_for(&mime_type) {
            Some(export) => (
                format!(
                    "{API}/files/{item_id}/export?mimeType={}",
                    url::form_urlencoded::byte_serialize(export.as_bytes()).collect::<String>()
                ),
                export.to_string(),
            ),
            None => (format!("{API}/files/{item_id}?alt=media"), mime_type),
        };
        let bytes = self
            .get(&url)
            .await?
            .bytes()
            .await
            .map_err(|e| ProcessorError::Internal(format!("drive download: {e}")))?
            .to_vec();
        Ok(FetchedItem {
            bytes,
            content_type,
            meta,
        })
    }

    async fn insert(&self, payload: &[u8], name: &str) -> ProcessorResult<String> {
        let response = self
            .http
            .post(format!("{UPLOAD_API}/files?uploadType=media"))
            .bearer_auth(&self.access_token)
            .header("X-Upload-Content-Name", name)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("drive upload: {e}")))?;
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "drive upload returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProcessorError::Internal(format!("drive upload body: {e}")))?;
        Ok(body["id"].as_str().unwrap_or("").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_types_map_to_office_equivalents() {
        assert_eq!(
            export_mime_for("application/vnd.google-apps.document"),
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        );
        assert_eq!(
            export_mime_for("application/vnd.google-apps.spreadsheet"),
            Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
        );
        assert_eq!(
            export_mime_for("application/vnd.google-apps.presentation"),
            Some("application/vnd.openxmlformats-officedocument.presentationml.presentation")
        );
        assert_eq!(export_mime_for("application/vnd.google-apps.site"), Some("text/plain"));
        assert_eq!(
            export_mime_for("application/vnd.google-apps.script"),
            Some("application/vnd.google-apps.script+json")
        );
    }

    #[test]
    fn binary_types_stream_directly() {
        assert_eq!(export_mime_for("image/png"), None);
        assert_eq!(export_mime_for("application/pdf"), None);
    }
}
