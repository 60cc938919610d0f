pub mod s3;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use s3::{ObjectStorage, S3Storage};
pub use store::ObjectStoreStorage;

use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use common::Result;
use common::config::{StorageBackend, StorageConfig};
use std::sync::Arc;
use tracing::info;

/// Builds an S3 client. Static credentials are used when both keys are
/// configured (MinIO and friends); otherwise the default AWS provider chain.
pub async fn build_s3_client(config: &StorageConfig) -> Result<S3Client> {
    let region = Region::new(config.region.clone());

    let s3_config = match (&config.access_key, &config.secret_key) {
        (Some(access_key), Some(secret_key)) => {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            let mut builder = aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(credentials)
                .force_path_style(true);
            if let Some(endpoint) = &config.endpoint {
                builder = builder.endpoint_url(endpoint);
            }
            builder.build()
        }
        _ => {
            let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            let mut builder = aws_sdk_s3::config::Builder::from(&shared);
            if let Some(endpoint) = &config.endpoint {
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }
            builder.build()
        }
    };

    Ok(S3Client::from_conf(s3_config))
}

/// Verifies that a bucket exists and is accessible
pub async fn verify_bucket_exists(client: &S3Client, bucket: &str) -> Result<()> {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => Ok(()),
        Err(e) => Err(common::Error::Storage(format!(
            "Cannot access bucket '{}': {}",
            bucket, e
        ))),
    }
}

/// Opens the configured storage backend.
pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>> {
    let storage: Arc<dyn ObjectStorage> = match config.backend {
        StorageBackend::S3 => {
            let client = build_s3_client(config).await?;
            verify_bucket_exists(&client, &config.bucket).await?;
            Arc::new(S3Storage::new(Arc::new(client), &config.bucket))
        }
        StorageBackend::Local => {
            let root = config.root.as_deref().ok_or_else(|| {
                common::Error::InvalidInput("storage.root is required for the local backend".into())
            })?;
            Arc::new(ObjectStoreStorage::local(root, &config.bucket)?)
        }
        StorageBackend::Memory => Arc::new(ObjectStoreStorage::in_memory(&config.bucket)),
    };

    info!(backend = ?config.backend, bucket = %config.bucket, "Opened object storage");
    Ok(storage)
}
