use std::collections::HashSet;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    error::SdkError,
    operation::create_bucket::CreateBucketError,
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    access::AccessGrant,
    error::{SatelliteError, SatelliteResult},
};

/// Metadata of one stored object, as returned by a recursive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: i64,
    pub modified: Option<DateTime<Utc>>,
}

/// The thin contract over the content-addressed satellite. Processors and
/// the reconciler depend on this trait so tests can substitute an
/// in-memory store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        access_grant: &str,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> SatelliteResult<()>;

    async fn download(&self, access_grant: &str, bucket: &str, key: &str)
        -> SatelliteResult<Vec<u8>>;

    async fn delete(&self, access_grant: &str, bucket: &str, key: &str) -> SatelliteResult<()>;

    async fn list(
        &self,
        access_grant: &str,
        bucket: &str,
        prefix: &str,
    ) -> SatelliteResult<HashSet<String>>;

    async fn list_recursive(
        &self,
        access_grant: &str,
        bucket: &str,
    ) -> SatelliteResult<Vec<ObjectMeta>>;
}

/// S3 gateway to the satellite. Holds no per-user state: the access grant
/// is parsed and a client built on every call, and the bucket is ensured
/// before each operation.
#[derive(Debug, Clone, Default)]
pub struct SatelliteGateway {
    /// Optional endpoint override (`STORX_SATELLITE_SERVICE`), taking
    /// precedence over the endpoint inside the grant.
    satellite_override: Option<String>,
}

impl SatelliteGateway {
    pub fn new(satellite_override: Option<String>) -> Self {
        Self { satellite_override }
    }

    fn client(&self, access_grant: &str) -> SatelliteResult<Client> {
        let grant = AccessGrant::parse(access_grant)?;
        let endpoint = self
            .satellite_override
            .clone()
            .unwrap_or_else(|| grant.satellite.clone());
        let credentials = Credentials::new(
            grant.access_key_id,
            grant.secret_access_key,
            None,
            None,
            "storx-access-grant",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Ok(Client::from_conf(config))
    }

    /// Create the bucket, treating "already exists" as success.
    async fn ensure_bucket(&self, client: &Client, bucket: &str) -> SatelliteResult<()> {
        match client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                debug!(bucket, "bucket created");
                Ok(())
            }
            Err(SdkError::ServiceError(err))
                if matches!(
                    err.err(),
                    CreateBucketError::BucketAlreadyExists(_)
                        | CreateBucketError::BucketAlreadyOwnedByYou(_)
                ) =>
            {
                Ok(())
            }
            Err(e) => Err(SatelliteError::Storage(format!(
                "create bucket {bucket}: {e}"
            ))),
        }
    }
}

#[async_trait]
impl ObjectStore for SatelliteGateway {
    async fn upload(
        &self,
        access_grant: &str,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> SatelliteResult<()> {
        let client = self.client(access_grant)?;
        self.ensure_bucket(&client, bucket).await?;
        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| SatelliteError::Storage(format!("put {bucket}/{key}: {e}")))?;
        Ok(())
    }

    async fn download(
        &self,
        access_grant: &str,
        bucket: &str,
        key: &str,
    ) -> SatelliteResult<Vec<u8>> {
        let client = self.client(access_grant)?;
        let object = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(err) if err.err().is_no_such_key() => {
                    SatelliteError::NotFound(format!("{bucket}/{key}"))
                }
                _ => SatelliteError::Storage(format!("get {bucket}/{key}: {e}")),
            })?;
        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| SatelliteError::Storage(format!("read {bucket}/{key}: {e}")))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn delete(&self, access_grant: &str, bucket: &str, key: &str) -> SatelliteResult<()> {
        let client = self.client(access_grant)?;
        client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| SatelliteError::Storage(format!("delete {bucket}/{key}: {e}")))?;
        Ok(())
    }

    async fn list(
        &self,
        access_grant: &str,
        bucket: &str,
        prefix: &str,
    ) -> SatelliteResult<HashSet<String>> {
        let client = self.client(access_grant)?;
        self.ensure_bucket(&client, bucket).await?;
        let mut keys = HashSet::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| SatelliteError::Storage(format!("list {bucket}/{prefix}: {e}")))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.insert(key.to_string());
                }
            }
            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn list_recursive(
        &self,
        access_grant: &str,
        bucket: &str,
    ) -> SatelliteResult<Vec<ObjectMeta>> {
        let client = self.client(access_grant)?;
        self.ensure_bucket(&client, bucket).await?;
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| SatelliteError::Storage(format!("list {bucket}: {e}")))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(ObjectMeta {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0),
                    modified: object
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), 0)),
                });
            }
            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(objects)
    }
}
