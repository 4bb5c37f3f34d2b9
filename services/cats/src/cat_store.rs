use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::cat::Cat;

/// Errors raised by a cat store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Filter, ordering and paging for cat lookups
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatQuery {
    /// Only cats classified safe for work
    pub safe_only: bool,
    /// Only the cat with this id
    pub id: Option<Uuid>,
    /// Order by count descending instead of insertion order
    pub order_by_count_desc: bool,
    /// Maximum number of results
    pub limit: Option<i64>,
    /// Offset for pagination
    pub offset: Option<i64>,
}

impl CatQuery {
    /// Cats classified safe for work
    pub fn safe() -> Self {
        Self {
            safe_only: true,
            ..Default::default()
        }
    }

    /// The `n` cats with the highest count
    pub fn top(n: i64) -> Self {
        Self {
            order_by_count_desc: true,
            limit: Some(n),
            ..Default::default()
        }
    }

    /// Restrict to page `index` of `size` results
    pub fn page(mut self, index: i64, size: i64) -> Self {
        self.limit = Some(size);
        self.offset = Some(index * size);
        self
    }

    fn matches(&self, cat: &Cat) -> bool {
        if self.safe_only && cat.is_safe_for_work() != Some(true) {
            return false;
        }
        match self.id {
            Some(id) => cat.id() == Some(id),
            None => true,
        }
    }
}

/// Document store holding cat records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CatStore: Send + Sync {
    /// Get a cat by id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Cat>, StoreError>;

    /// Cats matching the query's filter, ordering and paging
    async fn find_all(&self, query: &CatQuery) -> Result<Vec<Cat>, StoreError>;

    /// Ids of every stored cat
    async fn find_ids(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Number of cats matching the query's filter (ordering and paging ignored)
    async fn count(&self, query: &CatQuery) -> Result<u64, StoreError>;

    /// Insert or replace a cat, assigning an id on first save
    async fn persist_or_update(&self, cat: &mut Cat) -> Result<Uuid, StoreError>;

    /// Delete a cat, returning whether anything was removed
    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Delete every cat, returning how many were removed
    async fn delete_all(&self) -> Result<u64, StoreError>;

    /// Check the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process store, kept in insertion order
#[derive(Default)]
pub struct MemoryCatStore {
    cats: RwLock<Vec<Cat>>,
}

impl MemoryCatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatStore for MemoryCatStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Cat>, StoreError> {
        Ok(self
            .cats
            .read()
            .iter()
            .find(|c| c.id() == Some(id))
            .cloned())
    }

    async fn find_all(&self, query: &CatQuery) -> Result<Vec<Cat>, StoreError> {
        let mut cats: Vec<Cat> = self
            .cats
            .read()
            .iter()
            .filter(|c| query.matches(c))
            .cloned()
            .collect();

        if query.order_by_count_desc {
            // Stable: ties keep insertion order
            cats.sort_by(|a, b| b.count().cmp(&a.count()));
        }

        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l.max(0) as usize);

        Ok(cats.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.cats.read().iter().filter_map(Cat::id).collect())
    }

    async fn count(&self, query: &CatQuery) -> Result<u64, StoreError> {
        Ok(self.cats.read().iter().filter(|c| query.matches(c)).count() as u64)
    }

    async fn persist_or_update(&self, cat: &mut Cat) -> Result<Uuid, StoreError> {
        let id = cat.assign_id(Uuid::new_v4());
        let mut cats = self.cats.write();

        match cats.iter_mut().find(|c| c.id() == Some(id)) {
            Some(existing) => *existing = cat.clone(),
            None => cats.push(cat.clone()),
        }

        debug!(cat_id = %id, count = cat.count(), issfw = ?cat.is_safe_for_work(), "Cat persisted");
        Ok(id)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut cats = self.cats.write();
        let before = cats.len();
        cats.retain(|c| c.id() != Some(id));
        Ok(cats.len() < before)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut cats = self.cats.write();
        let removed = cats.len() as u64;
        cats.clear();
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
