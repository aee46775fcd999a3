pub mod error;
pub mod metrics;
pub mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storx_backup_providers::{ProcessorDeps, ProviderKeys};
use storx_backup_satellite::{ObjectStore, SatelliteGateway, WebhookDecryptor};
use storx_backup_store::Store;

use crate::error::HostResult;

fn default_address() -> String {
    "0.0.0.0:8005".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Default, Clone, Serialize, Deserialize, Debug, Parser)]
#[command(
    name = "storx-backup",
    about = "The StorX backup orchestration host",
    long_about = None
)]
#[serde(default)]
pub struct Cli {
    /// Server bind address
    /// [default: 0.0.0.0:8005]
    #[arg(long, require_equals = true, env = "ADDRESS", default_value = "0.0.0.0:8005")]
    #[serde(default = "default_address")]
    pub address: String,

    /// Listen port; shorthand for `--address 0.0.0.0:<port>`
    #[arg(long, require_equals = true, env = "PORT")]
    pub port: Option<u16>,

    /// Postgres connection string
    #[arg(long, require_equals = true, env = "POSTGRES_DSN")]
    pub postgres_dsn: Option<String>,

    /// Echo every SQL statement at debug level
    #[arg(long, env = "QUERY_LOGGING")]
    pub query_logging: bool,

    /// Override the satellite endpoint encoded in access grants
    #[arg(long, require_equals = true, env = "STORX_SATELLITE_SERVICE")]
    pub storx_satellite_service: Option<String>,

    /// Dispatch worker count; 0 means one per CPU core
    #[arg(long, require_equals = true, default_value = "0")]
    pub workers: usize,

    /// Path to the provider OAuth client credentials
    #[arg(long, require_equals = true, default_value = "credentials.json")]
    pub credentials_path: PathBuf,

    /// PEM file with the RSA key webhook envelopes are wrapped to
    #[arg(long, require_equals = true, env = "WEBHOOK_RSA_KEY_PATH")]
    pub webhook_rsa_key_path: Option<PathBuf>,

    /// SMTP relay for notification mail
    #[arg(long, require_equals = true, env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    /// SMTP username for notification mail
    #[arg(long, require_equals = true, env = "SMTP_USERNAME")]
    pub smtp_username: Option<String>,

    /// SMTP password / API key for notification mail
    #[arg(long, require_equals = true, env = "EMAIL_API_KEY")]
    pub email_api_key: Option<String>,

    /// From address for notification mail
    #[arg(long, require_equals = true, env = "EMAIL_FROM")]
    pub email_from: Option<String>,

    /// Frontend URL linked in notification mail
    #[arg(long, require_equals = true, env = "FRONTEND_URL", default_value = "https://storx.io")]
    pub frontend_url: String,

    /// Optional JSON config file merged under the command line
    #[arg(long, require_equals = true)]
    pub config_path: Option<PathBuf>,

    /// Set the log level
    #[arg(long, require_equals = true, env = "RUST_LOG", default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Cli {
    /// The socket address to bind: `PORT` wins over `--address`.
    pub fn bind_address(&self) -> String {
        match self.port {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.address.clone(),
        }
    }

    /// Read the options from a file and merge it with the current options.
    pub fn merge_from_file(&mut self) -> HostResult<()> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("open {}: {e}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let mut config: Value = serde_json::from_reader(reader)?;
        let this = serde_json::to_value(self.clone())?;
        merge(&mut config, &this);
        *self = serde_json::from_value(config)?;
        Ok(())
    }
}

/// Merges two json's together, overwriting `a` with the values of `b`
fn merge(a: &mut Value, b: &Value) {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            for (k, v) in b {
                merge(a.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (a, b) if !b.is_null() => *a = b.clone(),
        // If b is null, just keep a (which means do nothing).
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::merge;
    use serde_json::json;

    #[test]
    fn merge_overwrites_with_non_null() {
        let mut base = json!({ "address": "0.0.0.0:9000", "workers": 4 });
        let overlay = json!({ "address": "0.0.0.0:8005", "workers": null });
        merge(&mut base, &overlay);
        assert_eq!(base["address"], "0.0.0.0:8005");
        assert_eq!(base["workers"], 4);
    }

    #[test]
    fn merge_descends_into_objects() {
        let mut base = json!({ "nested": { "a": 1, "b": 2 } });
        let overlay = json!({ "nested": { "b": 3 } });
        merge(&mut base, &overlay);
        assert_eq!(base["nested"]["a"], 1);
        assert_eq!(base["nested"]["b"], 3);
    }
}

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub gateway: Arc<dyn ObjectStore>,
    pub deps: ProcessorDeps,
    pub decryptor: Option<Arc<WebhookDecryptor>>,
}

impl AppState {
    pub fn new(
        store: Store,
        gateway: Arc<SatelliteGateway>,
        keys: ProviderKeys,
        decryptor: Option<Arc<WebhookDecryptor>>,
    ) -> Self {
        let deps = ProcessorDeps {
            store: Arc::new(store.clone()),
            gateway: gateway.clone(),
            keys,
        };
        Self {
            store,
            gateway,
            deps,
            decryptor,
        }
    }
}
