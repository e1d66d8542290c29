//! Typed persistence seams.
//!
//! Each entity gets an explicit `Repository<T>` instead of a name-keyed
//! model lookup. Production code uses the DynamoDB and S3 adapters; tests
//! use the in-memory ones.

pub mod attributes;
pub mod dynamo;
pub mod memory;
pub mod s3;

use crate::error::StoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use dynamo::DynamoRepository;
pub use memory::{MemoryObjectStore, MemoryRepository};
pub use s3::S3ObjectStore;

/// A persisted entity in the single table.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity tag, also the partition of the listing index.
    const ENTITY: &'static str;

    fn partition_key(&self) -> String;

    fn sort_key(&self) -> String;

    /// Sort key within the entity listing index.
    fn list_key(&self) -> String {
        self.sort_key()
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<T>, StoreError>;

    /// One page of every record of this entity, ordered by `list_key`.
    async fn list(&self, cursor: Option<String>, limit: usize) -> Result<Page<T>, StoreError>;

    /// Every record sharing a partition key.
    async fn list_partition(&self, pk: &str) -> Result<Vec<T>, StoreError>;

    /// Conditional create; `AlreadyExists` if the key is taken.
    async fn create(&self, record: &T) -> Result<(), StoreError>;

    /// Conditional replace; `NotFound` if the key is absent.
    async fn update(&self, record: &T) -> Result<(), StoreError>;

    /// Unconditional last-write-wins replace.
    async fn put(&self, record: &T) -> Result<(), StoreError>;

    async fn delete(&self, pk: &str, sk: &str) -> Result<(), StoreError>;
}

/// Walk every page of `repo`.
pub async fn list_all<T: Record>(
    repo: &dyn Repository<T>,
    page_size: usize,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    let mut cursor = None;
    loop {
        let page = repo.list(cursor, page_size).await?;
        out.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(out)
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_text(&self, key: &str, body: String, content_type: &str) -> Result<(), StoreError>;

    async fn get_text(&self, key: &str) -> Result<String, StoreError>;

    /// Time-limited download URL for `key`.
    async fn presign_get(&self, key: &str, expires_secs: u64) -> Result<String, StoreError>;
}
