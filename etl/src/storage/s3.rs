use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use bytes::Bytes;
use common::Result;
use std::sync::Arc;
use tracing::debug;

/// S3 caps a single DeleteObjects request at 1000 keys.
const DELETE_BATCH_SIZE: usize = 1000;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()>;
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
    /// Returns full object keys under `prefix`, sorted.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
    /// Deleting an empty slice is a no-op.
    async fn delete_objects(&self, keys: &[String]) -> Result<()>;
    async fn check_file_exists(&self, key: &str) -> Result<bool>;
    fn bucket(&self) -> &str;
}

fn storage_error<E: std::fmt::Display, R>(err: SdkError<E, R>) -> common::Error {
    match err {
        SdkError::ServiceError(service) => common::Error::Storage(service.into_err().to_string()),
        other => common::Error::Storage(other.to_string()),
    }
}

pub struct S3Storage {
    bucket: String,
    client: Arc<S3Client>,
}

impl S3Storage {
    pub fn new(client: Arc<S3Client>, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let body = Bytes::copy_from_slice(data);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .send()
            .await
            .map_err(storage_error)?;

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(err) if err.err().is_no_such_key() => {
                    common::Error::Storage(format!(
                        "Object {} not found in bucket {}",
                        key, self.bucket
                    ))
                }
                other => storage_error(other),
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| common::Error::Storage(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(storage_error)?;

            if let Some(contents) = response.contents {
                for object in contents {
                    if let Some(key) = object.key {
                        objects.push(key);
                    }
                }
            }

            continuation_token = response.next_continuation_token;
            if continuation_token.is_none() {
                break;
            }
        }

        objects.sort();
        Ok(objects)
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let identifiers = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| common::Error::Storage(e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;

            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .map_err(|e| common::Error::Storage(e.to_string()))?;

            let response = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(storage_error)?;

            // Quiet mode only reports failures.
            let failures = response.errors();
            if !failures.is_empty() {
                let failed: Vec<String> = failures
                    .iter()
                    .map(|err| {
                        format!(
                            "{}: {}",
                            err.key().unwrap_or("<unknown>"),
                            err.message().unwrap_or("unknown error")
                        )
                    })
                    .collect();
                return Err(common::Error::Storage(format!(
                    "Failed to delete {} objects from {}: {}",
                    failed.len(),
                    self.bucket,
                    failed.join(", ")
                )));
            }

            debug!(bucket = %self.bucket, count = chunk.len(), "Deleted objects");
        }

        Ok(())
    }

    async fn check_file_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(err)) if err.err().is_not_found() => Ok(false),
            Err(e) => Err(storage_error(e)),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
