//! Static-token sources: Dropbox, GitHub, Shopify and QuickBooks. Each is
//! a thin client over the provider's REST surface; the framework only sees
//! the `SourceAdapter` shape.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use storx_backup_lib::{ProcessorError, ProcessorResult};

use crate::{
    adapter::{FetchedItem, ItemPage, SourceAdapter, SourceItem, UserIdentity},
    google::{http_client, required_field},
};

/// Dropbox: enumerates the whole folder tree through `list_folder` and its
/// cursor-based continuation.
pub struct DropboxAdapter {
    http: Client,
    token: String,
}

impl DropboxAdapter {
    pub async fn connect(input_data: &Value) -> ProcessorResult<Self> {
        let token = required_field(input_data, "access_token")?;
        Ok(Self {
            http: http_client()?,
            token,
        })
    }

    async fn rpc(&self, url: &str, body: Value) -> ProcessorResult<Value> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("dropbox: {e}")))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "dropbox returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ProcessorError::Internal(format!("dropbox body: {e}")))
    }
}

#[async_trait]
impl SourceAdapter for DropboxAdapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        let account = self
            .rpc(
                "https://api.dropboxapi.com/2/users/get_current_account",
                Value::Null,
            )
            .await?;
        Ok(UserIdentity {
            email: account["email"].as_str().unwrap_or("").to_string(),
            display_name: account["name"]["display_name"].as_str().unwrap_or("").to_string(),
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        _filter: Option<&str>,
        limit: usize,
    ) -> ProcessorResult<ItemPage> {
        let page = match page_token {
            Some(cursor) => {
                self.rpc(
                    "https://api.dropboxapi.com/2/files/list_folder/continue",
                    json!({ "cursor": cursor }),
                )
                .await?
            }
            None => {
                self.rpc(
                    "https://api.dropboxapi.com/2/files/list_folder",
                    json!({ "path": "", "recursive": true, "limit": limit }),
                )
                .await?
            }
        };
        let items = page["entries"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry[".tag"].as_str() == Some("file"))
                    .map(|entry| SourceItem {
                        id: entry["path_lower"].as_str().unwrap_or("").to_string(),
                        name: entry["name"].as_str().unwrap_or("file").to_string(),
                        mime_type: None,
                        meta: entry.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let next = page["has_more"]
            .as_bool()
            .unwrap_or(false)
            .then(|| page["cursor"].as_str().unwrap_or("").to_string());
        Ok(ItemPage {
            items,
            next_page_token: next,
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        let arg = json!({ "path": item_id }).to_string();
        let response = self
            .http
            .post("https://content.dropboxapi.com/2/files/download")
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", arg)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("dropbox download: {e}")))?;
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "dropbox download returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProcessorError::Internal(format!("dropbox download: {e}")))?
            .to_vec();
        Ok(FetchedItem {
            bytes,
            content_type: "application/octet-stream".to_string(),
            meta: Value::Null,
        })
    }

    async fn insert(&self, payload: &[u8], name: &str) -> ProcessorResult<String> {
        let arg = json!({ "path": format!("/{name}"), "mode": "overwrite" }).to_string();
        let response = self
            .http
            .post("https://content.dropboxapi.com/2/files/upload")
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", arg)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("dropbox upload: {e}")))?;
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "dropbox upload returned {}",
                response.status()
            )));
        }
        Ok(name.to_string())
    }
}

/// GitHub: each repository is one item, fetched as a tarball snapshot.
pub struct GithubAdapter {
    http: Client,
    token: String,
}

impl GithubAdapter {
    pub async fn connect(input_data: &Value) -> ProcessorResult<Self> {
        let token = required_field(input_data, "access_token")?;
        Ok(Self {
            http: http_client()?,
            token,
        })
    }

    async fn get(&self, url: &str) -> ProcessorResult<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, "storx-backup")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("github: {e}")))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "github returned {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl SourceAdapter for GithubAdapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        let user = self
            .get("https://api.github.com/user")
            .await?
            .json::<Value>()
            .await
            .map_err(|e| ProcessorError::Internal(format!("github identity: {e}")))?;
        Ok(UserIdentity {
            email: user["email"]
                .as_str()
                .or(user["login"].as_str())
                .unwrap_or("")
                .to_string(),
            display_name: user["login"].as_str().unwrap_or("").to_string(),
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        _filter: Option<&str>,
        limit: usize,
    ) -> ProcessorResult<ItemPage> {
        let page_number: u32 = page_token.and_then(|t| t.parse().ok()).unwrap_or(1);
        let repos = self
            .get(&format!(
                "https://api.github.com/user/repos?per_page={limit}&page={page_number}"
            ))
            .await?
            .json::<Vec<Value>>()
            .await
            .map_err(|e| ProcessorError::Internal(format!("github list: {e}")))?;
        let full_page = repos.len() == limit;
        let items = repos
            .into_iter()
            .map(|repo| SourceItem {
                id: repo["full_name"].as_str().unwrap_or("").to_string(),
                name: repo["name"].as_str().unwrap_or("repo").to_string(),
                mime_type: Some("application/gzip".to_string()),
                meta: repo,
            })
            .collect();
        Ok(ItemPage {
            items,
            next_page_token: full_page.then(|| (page_number + 1).to_string()),
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        let response = self
            .get(&format!("https://api.github.com/repos/{item_id}/tarball"))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProcessorError::Internal(format!("github tarball: {e}")))?
            .to_vec();
        Ok(FetchedItem {
            bytes,
            content_type: "application/gzip".to_string(),
            meta: Value::Null,
        })
    }

    async fn insert(&self, _payload: &[u8], _name: &str) -> ProcessorResult<String> {
        Err(ProcessorError::Internal(
            "github restore is not supported".to_string(),
        ))
    }
}

/// Shopify: the shop's core collections are backed up as JSON documents,
/// one logical item per collection.
pub struct ShopifyAdapter {
    http: Client,
    token: String,
    shop: String,
}

const SHOPIFY_COLLECTIONS: [&str; 3] = ["products", "orders", "customers"];
const SHOPIFY_API_VERSION: &str = "2024-01";

impl ShopifyAdapter {
    pub async fn connect(input_data: &Value) -> ProcessorResult<Self> {
        let token = required_field(input_data, "access_token")?;
        let shop = required_field(input_data, "shop_domain")?;
        Ok(Self {
            http: http_client()?,
            token,
            shop,
        })
    }
}

#[async_trait]
impl SourceAdapter for ShopifyAdapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        Ok(UserIdentity {
            email: self.shop.clone(),
            display_name: self.shop.clone(),
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        _filter: Option<&str>,
        _limit: usize,
    ) -> ProcessorResult<ItemPage> {
        if page_token.is_some() {
            return Ok(ItemPage::default());
        }
        let items = SHOPIFY_COLLECTIONS
            .iter()
            .map(|collection| SourceItem {
                id: collection.to_string(),
                name: format!("{collection}.json"),
                mime_type: Some("application/json".to_string()),
                meta: Value::Null,
            })
            .collect();
        Ok(ItemPage {
            items,
            next_page_token: None,
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        if !SHOPIFY_COLLECTIONS.contains(&item_id) {
            return Err(ProcessorError::Internal(format!(
                "unknown shopify collection {item_id}"
            )));
        }
        let response = self
            .http
            .get(format!(
                "https://{}/admin/api/{SHOPIFY_API_VERSION}/{item_id}.json?limit=250",
                self.shop
            ))
            .header("X-Shopify-Access-Token", &self.token)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("shopify: {e}")))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "shopify returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProcessorError::Internal(format!("shopify body: {e}")))?
            .to_vec();
        Ok(FetchedItem {
            bytes,
            content_type: "application/json".to_string(),
            meta: Value::Null,
        })
    }

    async fn insert(&self, _payload: &[u8], _name: &str) -> ProcessorResult<String> {
        Err(ProcessorError::Internal(
            "shopify restore is not supported".to_string(),
        ))
    }
}

/// QuickBooks: core accounting entities exported as JSON query results.
pub struct QuickbooksAdapter {
    http: Client,
    token: String,
    realm_id: String,
}

const QUICKBOOKS_ENTITIES: [&str; 4] = ["Customer", "Invoice", "Payment", "Vendor"];

impl QuickbooksAdapter {
    pub async fn connect(input_data: &Value) -> ProcessorResult<Self> {
        let token = required_field(input_data, "access_token")?;
        let realm_id = required_field(input_data, "realm_id")?;
        Ok(Self {
            http: http_client()?,
            token,
            realm_id,
        })
    }
}

#[async_trait]
impl SourceAdapter for QuickbooksAdapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        Ok(UserIdentity {
            email: self.realm_id.clone(),
            display_name: format!("quickbooks company {}", self.realm_id),
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        _filter: Option<&str>,
        _limit: usize,
    ) -> ProcessorResult<ItemPage> {
        if page_token.is_some() {
            return Ok(ItemPage::default());
        }
        let items = QUICKBOOKS_ENTITIES
            .iter()
            .map(|entity| SourceItem {
                id: entity.to_string(),
                name: format!("{}.json", entity.to_lowercase()),
                mime_type: Some("application/json".to_string()),
                meta: Value::Null,
            })
            .collect();
        Ok(ItemPage {
            items,
            next_page_token: None,
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        if !QUICKBOOKS_ENTITIES.contains(&item_id) {
            return Err(ProcessorError::Internal(format!(
                "unknown quickbooks entity {item_id}"
            )));
        }
        let query: String =
            url::form_urlencoded::byte_serialize(format!("select * from {item_id}").as_bytes())
                .collect();
        let response = self
            .http
            .get(format!(
                "https://quickbooks.api.intuit.com/v3/company/{}/query?query={query}",
                self.realm_id
            ))
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("quickbooks: {e}")))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(ProcessorError::Internal(format!(
                "quickbooks returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProcessorError::Internal(format!("quickbooks body: {e}")))?
            .to_vec();
        Ok(FetchedItem {
            bytes,
            content_type: "application/json".to_string(),
            meta: Value::Null,
        })
    }

    async fn insert(&self, _payload: &[u8], _name: &str) -> ProcessorResult<String> {
        Err(ProcessorError::Internal(
            "quickbooks restore is not supported".to_string(),
        ))
    }
}
