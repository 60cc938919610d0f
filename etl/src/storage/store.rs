use super::s3::ObjectStorage;
use async_trait::async_trait;
use common::Result;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

/// Adapts any `object_store` backend (local filesystem, in-memory, ...) to
/// [`ObjectStorage`]. Keys map one-to-one onto object paths.
pub struct ObjectStoreStorage {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreStorage {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            store,
        }
    }

    pub fn in_memory(bucket: &str) -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), bucket)
    }

    pub fn local(root: &str, bucket: &str) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(Arc::new(store), bucket))
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = Path::parse(key)?;
        self.store
            .put(&path, PutPayload::from(data.to_vec()))
            .await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = Path::parse(key)?;
        let bytes = self.store.get(&path).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        // object_store lists by whole path segments, so a trailing '/' on the
        // prefix is implied; filter again to keep plain string-prefix semantics
        // for prefixes that end mid-segment.
        let segment_prefix = match prefix.rfind('/') {
            Some(idx) => Some(Path::parse(&prefix[..idx])?),
            None => None,
        };

        let mut keys: Vec<String> = self
            .store
            .list(segment_prefix.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();

        keys.sort();
        Ok(keys)
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let path = Path::parse(key)?;
            match self.store.delete(&path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn check_file_exists(&self, key: &str) -> Result<bool> {
        let path = Path::parse(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
