use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockkeep_core::{DocumentId, ItemId, LocationId, StockId, StockKey};
use stockkeep_documents::{AnyDocument, DocumentKind};
use stockkeep_stock::{Stock, StockAdjustment, StockFilter};

/// Storage-layer error.
///
/// The duplicate variants come from uniqueness constraints and are lifted to
/// their domain counterparts by the service layer. Everything else is an
/// opaque internal failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("stock for item {item_id} at location {location_id} already exists")]
    DuplicateStockPair {
        item_id: ItemId,
        location_id: LocationId,
    },

    #[error("document code {0} already exists")]
    DuplicateCode(String),

    /// A row lock could not be acquired within the configured lock timeout.
    #[error("lock wait timed out: {0}")]
    LockTimeout(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Source of transactional sessions.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    type Tx: StoreTx;

    /// Open a new transaction.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One open transaction.
///
/// Reads see the transaction's own uncommitted writes. Row locks taken through
/// `lock_*` are held until `commit` or drop. Dropping without `commit` rolls
/// every write back.
///
/// Callers locking several stock rows must do so in ascending `StockKey`
/// order.
#[async_trait]
pub trait StoreTx: Send + Sized {
    async fn get_stock(&mut self, id: StockId) -> Result<Option<Stock>, StoreError>;

    /// Lock a stock row by id and return its current state.
    async fn lock_stock(&mut self, id: StockId) -> Result<Option<Stock>, StoreError>;

    /// Lock the stock row for an (item, location) pair, if one exists.
    async fn lock_stock_by_key(&mut self, key: StockKey) -> Result<Option<Stock>, StoreError>;

    /// Lock the row for `seed.key()`, inserting `seed` first when no row
    /// exists. Returns the locked row and whether it was inserted.
    async fn lock_or_insert_stock(&mut self, seed: Stock) -> Result<(Stock, bool), StoreError>;

    /// Insert a new row. Fails with `DuplicateStockPair` when the pair is taken.
    async fn insert_stock(&mut self, stock: &Stock) -> Result<(), StoreError>;

    async fn update_stock(&mut self, stock: &Stock) -> Result<(), StoreError>;

    /// Delete a row together with its adjustment ledger.
    async fn delete_stock(&mut self, id: StockId) -> Result<(), StoreError>;

    /// Rows matching `filter`, ordered by item id then location id.
    async fn list_stock(&mut self, filter: &StockFilter) -> Result<Vec<Stock>, StoreError>;

    async fn append_adjustment(&mut self, adjustment: &StockAdjustment) -> Result<(), StoreError>;

    /// Adjustments of one row, newest first.
    async fn list_adjustments(
        &mut self,
        stock_id: StockId,
    ) -> Result<Vec<StockAdjustment>, StoreError>;

    async fn get_document(&mut self, id: DocumentId) -> Result<Option<AnyDocument>, StoreError>;

    async fn lock_document(&mut self, id: DocumentId) -> Result<Option<AnyDocument>, StoreError>;

    /// Codes are unique per document kind.
    async fn document_code_exists(
        &mut self,
        kind: DocumentKind,
        code: &str,
    ) -> Result<bool, StoreError>;

    async fn insert_document(&mut self, doc: &AnyDocument) -> Result<(), StoreError>;

    /// Persist header fields and replace the stored line set with `doc`'s lines.
    async fn update_document(&mut self, doc: &AnyDocument) -> Result<(), StoreError>;

    /// Delete a document together with its lines.
    async fn delete_document(&mut self, id: DocumentId) -> Result<(), StoreError>;

    /// Documents of one kind, newest document date first.
    async fn list_documents(&mut self, kind: DocumentKind) -> Result<Vec<AnyDocument>, StoreError>;

    /// True when some draft document has a line on `key`.
    async fn stock_has_draft_references(&mut self, key: StockKey) -> Result<bool, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }
}
