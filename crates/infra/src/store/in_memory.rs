use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use stockkeep_core::{DocumentId, StockId, StockKey};
use stockkeep_documents::{AnyDocument, DocumentKind};
use stockkeep_stock::{Stock, StockAdjustment, StockFilter};

use super::r#trait::{InventoryStore, StoreError, StoreTx};

type Slot = Arc<tokio::sync::Mutex<()>>;

/// Row mutexes keyed by `K`, created on first use.
///
/// A slot is removed again once no transaction holds or waits on it, so the
/// table only ever holds keys that are in play.
#[derive(Debug)]
struct LockTable<K> {
    slots: Mutex<HashMap<K, Slot>>,
}

impl<K> Default for LockTable<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> LockTable<K>
where
    K: Copy + Eq + Hash,
{
    fn slot(&self, key: K) -> Result<Slot, StoreError> {
        let mut slots = self.slots.lock().map_err(|_| poisoned())?;
        Ok(Arc::clone(slots.entry(key).or_default()))
    }

    /// Drop `key`'s slot when the table holds the only reference.
    fn prune(&self, key: K) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        if slots.get(&key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or_default()
    }
}

/// Row locks owned by one transaction; released and pruned on drop.
#[derive(Debug)]
struct HeldLocks<K>
where
    K: Copy + Eq + Hash,
{
    table: Arc<LockTable<K>>,
    guards: HashMap<K, OwnedMutexGuard<()>>,
}

impl<K> HeldLocks<K>
where
    K: Copy + Eq + Hash + Display,
{
    fn new(table: &Arc<LockTable<K>>) -> Self {
        Self {
            table: Arc::clone(table),
            guards: HashMap::new(),
        }
    }

    async fn acquire(&mut self, key: K, timeout: Option<Duration>) -> Result<(), StoreError> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }
        let slot = self.table.slot(key)?;
        let guard = match timeout {
            Some(limit) => match tokio::time::timeout(limit, slot.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    self.table.prune(key);
                    return Err(StoreError::LockTimeout(format!(
                        "{key} still locked after {limit:?}"
                    )));
                }
            },
            None => slot.lock_owned().await,
        };
        self.guards.insert(key, guard);
        Ok(())
    }
}

impl<K> Drop for HeldLocks<K>
where
    K: Copy + Eq + Hash,
{
    fn drop(&mut self) {
        for (key, guard) in self.guards.drain() {
            drop(guard);
            self.table.prune(key);
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    stocks: BTreeMap<StockKey, Stock>,
    stock_keys: HashMap<StockId, StockKey>,
    /// Append order per stock row.
    adjustments: HashMap<StockId, Vec<StockAdjustment>>,
    documents: HashMap<DocumentId, AnyDocument>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    stock_locks: Arc<LockTable<StockKey>>,
    document_locks: Arc<LockTable<DocumentId>>,
    lock_timeout: Option<Duration>,
}

impl Shared {
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| poisoned())
    }
}

/// In-memory inventory store.
///
/// Intended for tests/dev. Row locks are async mutexes keyed by
/// (item, location) and by document id; a transaction keeps the owned guards
/// until it commits or is dropped, so waiting transactions resume in the same
/// places a database would make them wait.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    shared: Arc<Shared>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every lock wait; an expired wait fails with `StoreError::LockTimeout`.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                lock_timeout: Some(lock_timeout),
                ..Shared::default()
            }),
        }
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        Ok(InMemoryTx {
            shared: Arc::clone(&self.shared),
            stocks: HashMap::new(),
            adjustments: Vec::new(),
            documents: HashMap::new(),
            stock_guards: HeldLocks::new(&self.shared.stock_locks),
            document_guards: HeldLocks::new(&self.shared.document_locks),
        })
    }
}

/// Transaction over [`InMemoryInventoryStore`].
///
/// Writes are staged locally and applied to the shared tables on commit.
#[derive(Debug)]
pub struct InMemoryTx {
    shared: Arc<Shared>,
    /// `None` marks a deleted row.
    stocks: HashMap<StockId, Option<Stock>>,
    adjustments: Vec<StockAdjustment>,
    documents: HashMap<DocumentId, Option<AnyDocument>>,
    stock_guards: HeldLocks<StockKey>,
    document_guards: HeldLocks<DocumentId>,
}

impl InMemoryTx {
    fn view_stock(&self, id: StockId) -> Result<Option<Stock>, StoreError> {
        if let Some(staged) = self.stocks.get(&id) {
            return Ok(staged.clone());
        }
        let tables = self.shared.read()?;
        Ok(tables
            .stock_keys
            .get(&id)
            .and_then(|key| tables.stocks.get(key))
            .cloned())
    }

    fn view_stock_by_key(&self, key: StockKey) -> Result<Option<Stock>, StoreError> {
        if let Some(stock) = self.stocks.values().flatten().find(|s| s.key() == key) {
            return Ok(Some(stock.clone()));
        }
        let tables = self.shared.read()?;
        Ok(tables
            .stocks
            .get(&key)
            .filter(|s| !self.stocks.contains_key(&s.id_typed()))
            .cloned())
    }

    fn view_document(&self, id: DocumentId) -> Result<Option<AnyDocument>, StoreError> {
        if let Some(staged) = self.documents.get(&id) {
            return Ok(staged.clone());
        }
        Ok(self.shared.read()?.documents.get(&id).cloned())
    }

    fn view_documents(&self) -> Result<Vec<AnyDocument>, StoreError> {
        let tables = self.shared.read()?;
        let mut docs: Vec<AnyDocument> = tables
            .documents
            .values()
            .filter(|d| !self.documents.contains_key(&d.id()))
            .cloned()
            .collect();
        docs.extend(self.documents.values().flatten().cloned());
        Ok(docs)
    }

    async fn lock_key(&mut self, key: StockKey) -> Result<(), StoreError> {
        self.stock_guards
            .acquire(key, self.shared.lock_timeout)
            .await
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn get_stock(&mut self, id: StockId) -> Result<Option<Stock>, StoreError> {
        self.view_stock(id)
    }

    async fn lock_stock(&mut self, id: StockId) -> Result<Option<Stock>, StoreError> {
        let Some(current) = self.view_stock(id)? else {
            return Ok(None);
        };
        self.lock_key(current.key()).await?;
        // The row may have changed or gone while we waited.
        self.view_stock(id)
    }

    async fn lock_stock_by_key(&mut self, key: StockKey) -> Result<Option<Stock>, StoreError> {
        self.lock_key(key).await?;
        self.view_stock_by_key(key)
    }

    async fn lock_or_insert_stock(&mut self, seed: Stock) -> Result<(Stock, bool), StoreError> {
        let key = seed.key();
        self.lock_key(key).await?;
        if let Some(existing) = self.view_stock_by_key(key)? {
            return Ok((existing, false));
        }
        self.stocks.insert(seed.id_typed(), Some(seed.clone()));
        Ok((seed, true))
    }

    async fn insert_stock(&mut self, stock: &Stock) -> Result<(), StoreError> {
        let key = stock.key();
        self.lock_key(key).await?;
        if self.view_stock_by_key(key)?.is_some() {
            return Err(StoreError::DuplicateStockPair {
                item_id: key.item_id,
                location_id: key.location_id,
            });
        }
        self.stocks.insert(stock.id_typed(), Some(stock.clone()));
        Ok(())
    }

    async fn update_stock(&mut self, stock: &Stock) -> Result<(), StoreError> {
        if self.view_stock(stock.id_typed())?.is_none() {
            return Err(StoreError::Backend(format!(
                "stock {} does not exist",
                stock.id_typed()
            )));
        }
        self.stocks.insert(stock.id_typed(), Some(stock.clone()));
        Ok(())
    }

    async fn delete_stock(&mut self, id: StockId) -> Result<(), StoreError> {
        self.adjustments.retain(|a| a.stock_id != id);
        self.stocks.insert(id, None);
        Ok(())
    }

    async fn list_stock(&mut self, filter: &StockFilter) -> Result<Vec<Stock>, StoreError> {
        let tables = self.shared.read()?;
        let mut rows: BTreeMap<StockKey, Stock> = tables
            .stocks
            .iter()
            .filter(|(_, s)| !self.stocks.contains_key(&s.id_typed()))
            .map(|(k, s)| (*k, s.clone()))
            .collect();
        for stock in self.stocks.values().flatten() {
            rows.insert(stock.key(), stock.clone());
        }
        Ok(rows.into_values().filter(|s| filter.matches(s)).collect())
    }

    async fn append_adjustment(&mut self, adjustment: &StockAdjustment) -> Result<(), StoreError> {
        self.adjustments.push(adjustment.clone());
        Ok(())
    }

    async fn list_adjustments(
        &mut self,
        stock_id: StockId,
    ) -> Result<Vec<StockAdjustment>, StoreError> {
        if matches!(self.stocks.get(&stock_id), Some(None)) {
            return Ok(Vec::new());
        }
        let mut out: Vec<StockAdjustment> = self
            .shared
            .read()?
            .adjustments
            .get(&stock_id)
            .cloned()
            .unwrap_or_default();
        out.extend(
            self.adjustments
                .iter()
                .filter(|a| a.stock_id == stock_id)
                .cloned(),
        );
        out.reverse();
        Ok(out)
    }

    async fn get_document(&mut self, id: DocumentId) -> Result<Option<AnyDocument>, StoreError> {
        self.view_document(id)
    }

    async fn lock_document(&mut self, id: DocumentId) -> Result<Option<AnyDocument>, StoreError> {
        self.document_guards
            .acquire(id, self.shared.lock_timeout)
            .await?;
        self.view_document(id)
    }

    async fn document_code_exists(
        &mut self,
        kind: DocumentKind,
        code: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .view_documents()?
            .iter()
            .any(|d| d.kind() == kind && d.header().code == code))
    }

    async fn insert_document(&mut self, doc: &AnyDocument) -> Result<(), StoreError> {
        if self.document_code_exists(doc.kind(), &doc.header().code).await? {
            return Err(StoreError::DuplicateCode(doc.header().code.clone()));
        }
        self.documents.insert(doc.id(), Some(doc.clone()));
        Ok(())
    }

    async fn update_document(&mut self, doc: &AnyDocument) -> Result<(), StoreError> {
        if self.view_document(doc.id())?.is_none() {
            return Err(StoreError::Backend(format!(
                "document {} does not exist",
                doc.id()
            )));
        }
        self.documents.insert(doc.id(), Some(doc.clone()));
        Ok(())
    }

    async fn delete_document(&mut self, id: DocumentId) -> Result<(), StoreError> {
        self.documents.insert(id, None);
        Ok(())
    }

    async fn list_documents(&mut self, kind: DocumentKind) -> Result<Vec<AnyDocument>, StoreError> {
        let mut docs: Vec<AnyDocument> = self
            .view_documents()?
            .into_iter()
            .filter(|d| d.kind() == kind)
            .collect();
        docs.sort_by(|a, b| {
            b.document_date()
                .cmp(&a.document_date())
                .then_with(|| b.header().created_at.cmp(&a.header().created_at))
        });
        Ok(docs)
    }

    async fn stock_has_draft_references(&mut self, key: StockKey) -> Result<bool, StoreError> {
        Ok(self
            .view_documents()?
            .iter()
            .any(|d| d.is_draft_referencing(&key)))
    }

    async fn commit(self) -> Result<(), StoreError> {
        let InMemoryTx {
            shared,
            stocks,
            adjustments,
            documents,
            stock_guards,
            document_guards,
        } = self;

        let mut tables = shared.tables.write().map_err(|_| poisoned())?;

        // Code uniqueness is only checked here for concurrent inserts; validate
        // before touching the tables so a failed commit applies nothing.
        for doc in documents.values().flatten() {
            let clash = tables.documents.values().any(|other| {
                other.id() != doc.id()
                    && other.kind() == doc.kind()
                    && other.header().code == doc.header().code
                    && !matches!(documents.get(&other.id()), Some(None))
            });
            if clash {
                return Err(StoreError::DuplicateCode(doc.header().code.clone()));
            }
        }

        for (id, staged) in stocks {
            match staged {
                Some(stock) => {
                    let key = stock.key();
                    if let Some(old) = tables.stock_keys.insert(id, key) {
                        if old != key {
                            tables.stocks.remove(&old);
                        }
                    }
                    tables.stocks.insert(key, stock);
                }
                None => {
                    if let Some(key) = tables.stock_keys.remove(&id) {
                        tables.stocks.remove(&key);
                    }
                    tables.adjustments.remove(&id);
                }
            }
        }
        for adjustment in adjustments {
            tables
                .adjustments
                .entry(adjustment.stock_id)
                .or_default()
                .push(adjustment);
        }
        for (id, staged) in documents {
            match staged {
                Some(doc) => {
                    tables.documents.insert(id, doc);
                }
                None => {
                    tables.documents.remove(&id);
                }
            }
        }

        // Release row locks only once the writes are visible.
        drop(tables);
        drop(stock_guards);
        drop(document_guards);
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}
