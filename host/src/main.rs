use std::sync::Arc;

use clap::Parser;
use storx_backup_engine::{Engine, Mailer, MailerConfig};
use storx_backup_host::{server::serve, AppState, Cli};
use storx_backup_providers::ProviderKeys;
use storx_backup_satellite::{SatelliteGateway, WebhookDecryptor};
use storx_backup_store::Store;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let mut opts = Cli::parse();
    opts.merge_from_file().map_err(|e| anyhow::anyhow!("{e}"))?;

    let env_filter =
        EnvFilter::try_new(&opts.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let dsn = opts
        .postgres_dsn
        .clone()
        .ok_or_else(|| anyhow::anyhow!("POSTGRES_DSN is required"))?;
    let store = Store::open_with(&dsn, opts.query_logging).await?;

    let gateway = Arc::new(SatelliteGateway::new(opts.storx_satellite_service.clone()));

    let keys = match ProviderKeys::from_file(&opts.credentials_path) {
        Ok(keys) => keys,
        Err(e) => {
            warn!("provider credentials not loaded ({e}); OAuth sources are unavailable");
            ProviderKeys::default()
        }
    };

    let decryptor = match &opts.webhook_rsa_key_path {
        Some(path) => Some(Arc::new(WebhookDecryptor::from_pem_file(path)?)),
        None => {
            warn!("no webhook RSA key configured; /webhook will reject events");
            None
        }
    };

    let mailer = match (&opts.smtp_host, &opts.email_api_key, &opts.email_from) {
        (Some(host), Some(key), Some(from)) => Mailer::new(MailerConfig {
            smtp_host: host.clone(),
            smtp_username: opts.smtp_username.clone().unwrap_or_else(|| from.clone()),
            smtp_password: key.clone(),
            from: from.clone(),
            frontend_url: opts.frontend_url.clone(),
        }),
        _ => {
            info!("mailer not configured; expiry notifications are disabled");
            None
        }
    };

    let engine = Engine::new(store.clone(), gateway.clone(), keys.clone(), mailer);
    let handles = engine.start(opts.workers);

    let state = AppState::new(store, gateway, keys, decryptor);
    let result = serve(state, &opts.bind_address()).await;

    engine.stop();
    for handle in handles {
        let _ = handle.await;
    }
    result
}
