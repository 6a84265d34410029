//! Entity store adapter for Block aggregates. The backing store is a keyed
//! object store; this adapter owns the soft-delete scope, timestamp
//! population and the whole-list replacement of `replicas` (replicas are a
//! value object; diffs are computed against what was read, never merged
//! element-wise).

use async_trait::async_trait;
use basalt_types::Block;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Resolve by id. Default scope: soft-deleted blocks are invisible.
    async fn get(&self, id: &str) -> Result<Option<Block>>;

    /// Resolve by id including soft-deleted blocks.
    async fn get_any(&self, id: &str) -> Result<Option<Block>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Block>>;

    /// Matches `controller == uid` or any `replicas[*].pod == uid`.
    /// Soft-deleted blocks never match.
    async fn find_by_pod(&self, uid: &str) -> Result<Option<Block>>;

    async fn list(&self) -> Result<Vec<Block>>;

    /// Persists a new entity, stamping `createdAt`/`updatedAt`.
    async fn create(&self, block: Block) -> Result<Block>;

    /// Replaces the stored entity: scalars shallow-merged by full overwrite,
    /// `replicas` replaced as a whole list. Stamps `updatedAt`.
    async fn update(&self, block: &Block) -> Result<Block>;

    /// Sets `deletedAt`, hiding the entity from the default scope.
    async fn soft_remove(&self, id: &str) -> Result<Block>;
}

/// Loads a block or fails `BlockNotFound`. All reconciler operations go
/// through this so stale in-memory copies are discarded between lock
/// acquisitions.
pub async fn require(store: &dyn EntityStore, id: &str) -> Result<Block> {
    store
        .get(id)
        .await?
        .ok_or_else(|| Error::BlockNotFound(id.to_string()))
}

/// In-memory store backing tests and standalone runs.
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<HashMap<String, Block>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Block>> {
        let blocks = self.blocks.read().await;
        Ok(blocks
            .get(id)
            .filter(|b| b.deleted_at.is_none())
            .cloned())
    }

    async fn get_any(&self, id: &str) -> Result<Option<Block>> {
        let blocks = self.blocks.read().await;
        Ok(blocks.get(id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Block>> {
        let blocks = self.blocks.read().await;
        Ok(blocks
            .values()
            .find(|b| b.deleted_at.is_none() && b.name == name)
            .cloned())
    }

    async fn find_by_pod(&self, uid: &str) -> Result<Option<Block>> {
        let blocks = self.blocks.read().await;
        Ok(blocks
            .values()
            .find(|b| b.deleted_at.is_none() && b.owns_pod(uid))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Block>> {
        let blocks = self.blocks.read().await;
        let mut all: Vec<Block> = blocks
            .values()
            .filter(|b| b.deleted_at.is_none())
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn create(&self, mut block: Block) -> Result<Block> {
        let mut blocks = self.blocks.write().await;
        if blocks.contains_key(&block.id) {
            return Err(Error::Store(format!("duplicate id: {}", block.id)));
        }
        let now = Utc::now();
        block.created_at = now;
        block.updated_at = now;
        blocks.insert(block.id.clone(), block.clone());
        Ok(block)
    }

    async fn update(&self, block: &Block) -> Result<Block> {
        let mut blocks = self.blocks.write().await;
        let stored = blocks
            .get_mut(&block.id)
            .ok_or_else(|| Error::Store(format!("update of unknown id: {}", block.id)))?;
        let mut next = block.clone();
        next.created_at = stored.created_at;
        next.updated_at = Utc::now();
        *stored = next.clone();
        Ok(next)
    }

    async fn soft_remove(&self, id: &str) -> Result<Block> {
        let mut blocks = self.blocks.write().await;
        let stored = blocks
            .get_mut(id)
            .ok_or_else(|| Error::Store(format!("remove of unknown id: {}", id)))?;
        stored.deleted_at = Some(Utc::now());
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }
}
