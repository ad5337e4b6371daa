//! Stock ledger service.
//!
//! The only path that writes `Stock.quantity`. Every quantity change is a
//! read-modify-write under the row lock and is persisted together with its
//! adjustment record in the same transaction.
//!
//! Each public operation comes in two forms: `op(..)` runs in its own
//! transaction, `op_in(&mut tx, ..)` joins a transaction the caller owns so
//! several steps (e.g. create a row then adjust it) commit or roll back as one.

use chrono::Utc;
use tracing::{debug, info, instrument};

use stockkeep_core::{DomainError, StockId};
use stockkeep_stock::{
    AdjustmentRequest, NewStock, Stock, StockAdjustment, StockFilter, StockPatch, StockSnapshot,
};

use crate::error::ServiceResult;
use crate::reference::{ReferenceLookup, resolve_keys, resolve_user};
use crate::store::{InventoryStore, StoreTx};

#[derive(Debug, Clone)]
pub struct StockLedger<S, R> {
    store: S,
    refs: R,
}

impl<S, R> StockLedger<S, R>
where
    S: InventoryStore,
    R: ReferenceLookup,
{
    pub fn new(store: S, refs: R) -> Self {
        Self { store, refs }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn refs(&self) -> &R {
        &self.refs
    }

    /// Provision a row; its opening quantity is recorded as a `manual_audit`
    /// adjustment from 0.
    #[instrument(skip(self, new), fields(item_id = %new.item_id, location_id = %new.location_id), err)]
    pub async fn create_stock(&self, new: NewStock) -> ServiceResult<Stock> {
        let mut tx = self.store.begin().await?;
        let stock = self.create_stock_in(&mut tx, new).await?;
        tx.commit().await?;
        info!(stock_id = %stock.id_typed(), quantity = %stock.quantity(), "stock created");
        Ok(stock)
    }

    pub async fn create_stock_in(&self, tx: &mut S::Tx, new: NewStock) -> ServiceResult<Stock> {
        resolve_keys(&self.refs, &[new.key()]).await?;
        let (stock, adjustment) = Stock::provision(new, Utc::now())?;
        tx.insert_stock(&stock).await?;
        tx.append_adjustment(&adjustment).await?;
        Ok(stock)
    }

    /// Partial update under the row lock. A changed quantity writes a
    /// `manual_audit` adjustment for the difference.
    #[instrument(skip(self, patch), fields(stock_id = %id), err)]
    pub async fn update_stock(&self, id: StockId, patch: StockPatch) -> ServiceResult<Stock> {
        let mut tx = self.store.begin().await?;
        let stock = self.update_stock_in(&mut tx, id, patch).await?;
        tx.commit().await?;
        info!(quantity = %stock.quantity(), "stock updated");
        Ok(stock)
    }

    pub async fn update_stock_in(
        &self,
        tx: &mut S::Tx,
        id: StockId,
        patch: StockPatch,
    ) -> ServiceResult<Stock> {
        let mut stock = lock_existing(tx, id).await?;
        let adjustment = stock.apply_patch(&patch, Utc::now())?;
        tx.update_stock(&stock).await?;
        if let Some(adjustment) = adjustment {
            tx.append_adjustment(&adjustment).await?;
        }
        Ok(stock)
    }

    /// Apply a signed delta. On failure neither the row nor the ledger change.
    #[instrument(
        skip(self, request),
        fields(stock_id = %id, delta = %request.delta, adjustment_type = %request.adjustment_type),
        err
    )]
    pub async fn adjust_quantity(
        &self,
        id: StockId,
        request: AdjustmentRequest,
    ) -> ServiceResult<Stock> {
        let mut tx = self.store.begin().await?;
        let stock = self.adjust_quantity_in(&mut tx, id, request).await?;
        tx.commit().await?;
        info!(quantity = %stock.quantity(), "stock adjusted");
        Ok(stock)
    }

    pub async fn adjust_quantity_in(
        &self,
        tx: &mut S::Tx,
        id: StockId,
        request: AdjustmentRequest,
    ) -> ServiceResult<Stock> {
        if let Some(actor) = request.actor {
            resolve_user(&self.refs, actor).await?;
        }
        let stock = lock_existing(tx, id).await?;
        let (stock, _) = self.apply_locked(tx, stock, &request).await?;
        Ok(stock)
    }

    /// Apply `request` to a row the caller already holds the lock on.
    pub(crate) async fn apply_locked(
        &self,
        tx: &mut S::Tx,
        mut stock: Stock,
        request: &AdjustmentRequest,
    ) -> ServiceResult<(Stock, StockAdjustment)> {
        let adjustment = stock.apply_adjustment(request, Utc::now())?;
        tx.update_stock(&stock).await?;
        tx.append_adjustment(&adjustment).await?;
        debug!(
            stock_id = %stock.id_typed(),
            before = %adjustment.quantity_before,
            after = %adjustment.quantity_after,
            "adjustment recorded"
        );
        Ok((stock, adjustment))
    }

    /// All adjustments of a row, newest first.
    pub async fn list_adjustments(&self, id: StockId) -> ServiceResult<Vec<StockAdjustment>> {
        let mut tx = self.store.begin().await?;
        self.list_adjustments_in(&mut tx, id).await
    }

    pub async fn list_adjustments_in(
        &self,
        tx: &mut S::Tx,
        id: StockId,
    ) -> ServiceResult<Vec<StockAdjustment>> {
        if tx.get_stock(id).await?.is_none() {
            return Err(stock_not_found(id).into());
        }
        Ok(tx.list_adjustments(id).await?)
    }

    pub async fn get_stock(&self, id: StockId) -> ServiceResult<Stock> {
        let mut tx = self.store.begin().await?;
        self.get_stock_in(&mut tx, id).await
    }

    pub async fn get_stock_in(&self, tx: &mut S::Tx, id: StockId) -> ServiceResult<Stock> {
        tx.get_stock(id)
            .await?
            .ok_or_else(|| stock_not_found(id).into())
    }

    /// Rows matching `filter`, ordered by item id then location id.
    pub async fn list_stock(&self, filter: &StockFilter) -> ServiceResult<Vec<Stock>> {
        let mut tx = self.store.begin().await?;
        self.list_stock_in(&mut tx, filter).await
    }

    pub async fn list_stock_in(
        &self,
        tx: &mut S::Tx,
        filter: &StockFilter,
    ) -> ServiceResult<Vec<Stock>> {
        Ok(tx.list_stock(filter).await?)
    }

    /// Read-only view polled by the low-stock / expiry scanner.
    pub async fn snapshots(&self, filter: &StockFilter) -> ServiceResult<Vec<StockSnapshot>> {
        Ok(self
            .list_stock(filter)
            .await?
            .iter()
            .map(Stock::snapshot)
            .collect())
    }

    /// Delete a row and its ledger. Refused while a draft document still has
    /// a line on the row's (item, location).
    #[instrument(skip(self), fields(stock_id = %id), err)]
    pub async fn remove_stock(&self, id: StockId) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        self.remove_stock_in(&mut tx, id).await?;
        tx.commit().await?;
        info!("stock removed");
        Ok(())
    }

    pub async fn remove_stock_in(&self, tx: &mut S::Tx, id: StockId) -> ServiceResult<()> {
        let stock = lock_existing(tx, id).await?;
        if tx.stock_has_draft_references(stock.key()).await? {
            return Err(DomainError::invalid_state(format!(
                "stock {id} is referenced by a draft document"
            ))
            .into());
        }
        tx.delete_stock(id).await?;
        Ok(())
    }
}

async fn lock_existing<T: StoreTx>(tx: &mut T, id: StockId) -> ServiceResult<Stock> {
    let stock = tx.lock_stock(id).await?.ok_or_else(|| stock_not_found(id))?;
    debug!(stock_id = %id, "stock row locked");
    Ok(stock)
}

fn stock_not_found(id: StockId) -> DomainError {
    DomainError::not_found(format!("stock {id}"))
}
