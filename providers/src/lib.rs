pub mod adapter;
pub mod backup;
pub mod config;
pub mod dump;
pub mod google;
pub mod outlook;
pub mod processor;
pub mod s3;
pub mod scheduled;
pub mod tokens;

use std::sync::Arc;

use serde_json::Value;
use storx_backup_lib::{Method, ProcessorError, ProcessorResult};

// re-export
pub use adapter::{FetchedItem, ItemPage, SourceAdapter, SourceItem, UserIdentity};
pub use config::{ClientPair, ProviderKeys};
pub use processor::{
    upload_object_and_sync, BaseProcessor, Heartbeat, NoopHeartbeat, Processor, ProcessorDeps,
    ProcessorInput, ProcessorStore, RunReport,
};
pub use scheduled::{run_scheduled_task, run_scheduled_with};

/// Build an authenticated adapter for a method. Auth failures are already
/// classified: a rejected OAuth grant surfaces as `AuthExpired`, missing
/// or malformed credentials as `AuthConfig`.
pub async fn connect_adapter(
    method: Method,
    keys: &ProviderKeys,
    input_data: &Value,
) -> ProcessorResult<Arc<dyn SourceAdapter>> {
    let adapter: Arc<dyn SourceAdapter> = match method {
        Method::Gmail => Arc::new(google::gmail::GmailAdapter::connect(&keys.google, input_data).await?),
        Method::Outlook => {
            Arc::new(outlook::OutlookAdapter::connect(&keys.microsoft, input_data).await?)
        }
        Method::GoogleDrive => {
            Arc::new(google::drive::DriveAdapter::connect(&keys.google, input_data).await?)
        }
        Method::GooglePhotos => {
            Arc::new(google::photos::PhotosAdapter::connect(&keys.google, input_data).await?)
        }
        Method::GoogleCloud => {
            Arc::new(google::cloud::GoogleCloudAdapter::connect(&keys.google, input_data).await?)
        }
        Method::Dropbox => Arc::new(tokens::DropboxAdapter::connect(input_data).await?),
        Method::Github => Arc::new(tokens::GithubAdapter::connect(input_data).await?),
        Method::Shopify => Arc::new(tokens::ShopifyAdapter::connect(input_data).await?),
        Method::Quickbooks => Arc::new(tokens::QuickbooksAdapter::connect(input_data).await?),
        Method::AwsS3 => Arc::new(s3::AwsS3Adapter::connect(input_data).await?),
        Method::PsqlDatabase | Method::MysqlDatabase | Method::Database => {
            return Err(ProcessorError::Internal(format!(
                "{method} runs through the dump processor, not an adapter"
            )))
        }
    };
    Ok(adapter)
}

/// The processor registered for a method. Database methods run the dump
/// processor; everything else runs the adapter-backed backup processor.
pub fn processor_for(method: Method) -> Arc<dyn Processor> {
    if method.is_database() {
        Arc::new(dump::DumpProcessor)
    } else {
        Arc::new(backup::BackupProcessor::for_method(method))
    }
}
