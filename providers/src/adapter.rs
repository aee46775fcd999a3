use async_trait::async_trait;
use serde_json::Value;
use storx_backup_lib::ProcessorResult;

/// One enumerated source item, before its bytes are fetched.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub id: String,
    /// Display name: mail subject, file name, photo filename.
    pub name: String,
    pub mime_type: Option<String>,
    /// Provider metadata carried along for sidecar files.
    pub meta: Value,
}

/// A page of enumerated items plus the token for the next page.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<SourceItem>,
    pub next_page_token: Option<String>,
}

/// The bytes of one fetched item.
#[derive(Debug, Clone)]
pub struct FetchedItem {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub meta: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub email: String,
    pub display_name: String,
}

/// The capability set every backup source exposes. Implementations own an
/// authenticated client; construction is the per-provider `connect`
/// function, which classifies auth failures into the
/// `AuthExpired`/`AuthConfig` taxonomy.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The account this client acts for. Used to verify ownership
    /// continuity when credentials are replaced on an existing job.
    async fn user_identity(&self) -> ProcessorResult<UserIdentity>;

    /// One page of items. `filter` is provider-specific (mail query, media
    /// type, folder).
    async fn enumerate(
        &self,
        page_token: Option<&str>,
        filter: Option<&str>,
        limit: usize,
    ) -> ProcessorResult<ItemPage>;

    /// Fetch the bytes of one item.
    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem>;

    /// Write one item back into the source; restore flows only.
    async fn insert(&self, payload: &[u8], name: &str) -> ProcessorResult<String>;
}
