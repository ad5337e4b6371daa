//! Reference-data lookups (items, locations, users).
//!
//! These records belong to other services. The inventory core only asks
//! whether an id resolves, and always asks before touching stock.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::PgPool;

use stockkeep_core::{DomainError, ItemId, LocationId, ReferenceKind, StockKey, UserId};

use crate::error::ServiceResult;
use crate::store::StoreError;

#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    async fn item_exists(&self, id: ItemId) -> Result<bool, StoreError>;
    async fn location_exists(&self, id: LocationId) -> Result<bool, StoreError>;
    async fn user_exists(&self, id: UserId) -> Result<bool, StoreError>;
}

#[async_trait]
impl<R> ReferenceLookup for Arc<R>
where
    R: ReferenceLookup,
{
    async fn item_exists(&self, id: ItemId) -> Result<bool, StoreError> {
        (**self).item_exists(id).await
    }

    async fn location_exists(&self, id: LocationId) -> Result<bool, StoreError> {
        (**self).location_exists(id).await
    }

    async fn user_exists(&self, id: UserId) -> Result<bool, StoreError> {
        (**self).user_exists(id).await
    }
}

/// Fail with `UnknownReference { kind: User }` unless `id` resolves.
pub async fn resolve_user<R: ReferenceLookup>(refs: &R, id: UserId) -> ServiceResult<()> {
    if !refs.user_exists(id).await? {
        return Err(DomainError::unknown(ReferenceKind::User, id).into());
    }
    Ok(())
}

pub async fn resolve_users<R: ReferenceLookup>(refs: &R, ids: &[UserId]) -> ServiceResult<()> {
    for id in ids.iter().copied().collect::<BTreeSet<_>>() {
        resolve_user(refs, id).await?;
    }
    Ok(())
}

/// Resolve every item and location named by `keys`, each id once.
pub async fn resolve_keys<R: ReferenceLookup>(refs: &R, keys: &[StockKey]) -> ServiceResult<()> {
    let items: BTreeSet<ItemId> = keys.iter().map(|k| k.item_id).collect();
    let locations: BTreeSet<LocationId> = keys.iter().map(|k| k.location_id).collect();

    for id in items {
        if !refs.item_exists(id).await? {
            return Err(DomainError::unknown(ReferenceKind::Item, id).into());
        }
    }
    for id in locations {
        if !refs.location_exists(id).await? {
            return Err(DomainError::unknown(ReferenceKind::Location, id).into());
        }
    }
    Ok(())
}

/// In-memory reference data for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReferenceData {
    items: RwLock<HashSet<ItemId>>,
    locations: RwLock<HashSet<LocationId>>,
    users: RwLock<HashSet<UserId>>,
}

impl InMemoryReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&self) -> ItemId {
        let id = ItemId::new();
        if let Ok(mut items) = self.items.write() {
            items.insert(id);
        }
        id
    }

    pub fn add_location(&self) -> LocationId {
        let id = LocationId::new();
        if let Ok(mut locations) = self.locations.write() {
            locations.insert(id);
        }
        id
    }

    pub fn add_user(&self) -> UserId {
        let id = UserId::new();
        if let Ok(mut users) = self.users.write() {
            users.insert(id);
        }
        id
    }
}

#[async_trait]
impl ReferenceLookup for InMemoryReferenceData {
    async fn item_exists(&self, id: ItemId) -> Result<bool, StoreError> {
        let items = self.items.read().map_err(|_| poisoned())?;
        Ok(items.contains(&id))
    }

    async fn location_exists(&self, id: LocationId) -> Result<bool, StoreError> {
        let locations = self.locations.read().map_err(|_| poisoned())?;
        Ok(locations.contains(&id))
    }

    async fn user_exists(&self, id: UserId) -> Result<bool, StoreError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.contains(&id))
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// Lookups against the `items`, `locations` and `users` tables.
#[derive(Debug, Clone)]
pub struct PostgresReferenceData {
    pool: Arc<PgPool>,
}

impl PostgresReferenceData {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn exists(&self, sql: &'static str, id: uuid::Uuid) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(sql)
            .bind(id)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("reference lookup failed: {e}")))
    }
}

#[async_trait]
impl ReferenceLookup for PostgresReferenceData {
    async fn item_exists(&self, id: ItemId) -> Result<bool, StoreError> {
        self.exists("SELECT EXISTS (SELECT 1 FROM items WHERE id = $1)", id.into())
            .await
    }

    async fn location_exists(&self, id: LocationId) -> Result<bool, StoreError> {
        self.exists("SELECT EXISTS (SELECT 1 FROM locations WHERE id = $1)", id.into())
            .await
    }

    async fn user_exists(&self, id: UserId) -> Result<bool, StoreError> {
        self.exists("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)", id.into())
            .await
    }
}
