use super::{ObjectStorage, ObjectStoreStorage};
use async_trait::async_trait;
use common::{Error, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    List,
    Get,
    Put,
    Delete,
}

/// In-memory storage where one kind of operation always fails.
pub struct FailingStorage {
    pub inner: Arc<ObjectStoreStorage>,
    fail_on: StorageOp,
}

impl FailingStorage {
    pub fn new(inner: Arc<ObjectStoreStorage>, fail_on: StorageOp) -> Self {
        Self { inner, fail_on }
    }

    fn check(&self, op: StorageOp) -> Result<()> {
        if op == self.fail_on {
            Err(Error::Storage(format!("{:?} rejected", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStorage for FailingStorage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        self.check(StorageOp::Put)?;
        self.inner.put_object(key, data).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.check(StorageOp::Get)?;
        self.inner.get_object(key).await
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        self.check(StorageOp::List)?;
        self.inner.list_objects(prefix).await
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        self.check(StorageOp::Delete)?;
        self.inner.delete_objects(keys).await
    }

    async fn check_file_exists(&self, key: &str) -> Result<bool> {
        self.inner.check_file_exists(key).await
    }

    fn bucket(&self) -> &str {
        self.inner.bucket()
    }
}
