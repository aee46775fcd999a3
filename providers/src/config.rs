use serde::Deserialize;
use storx_backup_lib::{ProcessorError, ProcessorResult};

/// One provider's OAuth client credentials.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClientPair {
    pub client_id: String,
    pub client_secret: String,
}

/// OAuth client credentials per provider family, loaded once at startup
/// from `credentials.json`. Adapters that only carry a static user token
/// (Dropbox, GitHub) do not appear here.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProviderKeys {
    pub google: ClientPair,
    pub microsoft: ClientPair,
    pub shopify: ClientPair,
    pub quickbooks: ClientPair,
}

impl ProviderKeys {
    pub fn from_file(path: &std::path::Path) -> ProcessorResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProcessorError::AuthConfig(format!("read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ProcessorError::AuthConfig(format!("parse {}: {e}", path.display())))
    }
}
