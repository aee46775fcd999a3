use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use serde_json::Value;
use storx_backup_lib::{ProcessorError, ProcessorResult};

use crate::{
    adapter::{FetchedItem, ItemPage, SourceAdapter, SourceItem, UserIdentity},
    google::required_field,
};

/// External AWS S3 bucket as a backup source.
pub struct AwsS3Adapter {
    client: Client,
    bucket: String,
    account: String,
}

impl AwsS3Adapter {
    pub async fn connect(input_data: &Value) -> ProcessorResult<Self> {
        let access_key = required_field(input_data, "access_key_id")?;
        let secret_key = required_field(input_data, "secret_access_key")?;
        let bucket = required_field(input_data, "bucket_name")?;
        let region = input_data
            .get("region")
            .and_then(Value::as_str)
            .unwrap_or("us-east-1")
            .to_string();

        let credentials =
            Credentials::new(access_key.clone(), secret_key, None, None, "backup-source");
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .build();
        Ok(Self {
            client: Client::from_conf(config),
            bucket,
            account: access_key,
        })
    }
}

#[async_trait]
impl SourceAdapter for AwsS3Adapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        Ok(UserIdentity {
            email: self.account.clone(),
            display_name: format!("s3 bucket {}", self.bucket),
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        filter: Option<&str>,
        limit: usize,
    ) -> ProcessorResult<ItemPage> {
        let page = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(limit as i32)
            .set_prefix(filter.map(str::to_string))
            .set_continuation_token(page_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("s3 list: {e}")))?;
        let items = page
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .map(|key| SourceItem {
                id: key.to_string(),
                name: key.rsplit('/').next().unwrap_or(key).to_string(),
                mime_type: None,
                meta: Value::Null,
            })
            .collect();
        Ok(ItemPage {
            items,
            next_page_token: page.next_continuation_token().map(str::to_string),
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(item_id)
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("s3 get {item_id}: {e}")))?;
        let content_type = object
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| ProcessorError::Internal(format!("s3 read {item_id}: {e}")))?
            .into_bytes()
            .to_vec();
        Ok(FetchedItem {
            bytes,
            content_type,
            meta: Value::Null,
        })
    }

    async fn insert(&self, payload: &[u8], name: &str) -> ProcessorResult<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .body(ByteStream::from(payload.to_vec()))
            .send()
            .await
            .map_err(|e| ProcessorError::Internal(format!("s3 put {name}: {e}")))?;
        Ok(name.to_string())
    }
}
