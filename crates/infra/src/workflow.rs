//! Document confirmation.
//!
//! `confirm` is the one-way `draft -> confirmed` step that pushes every line
//! of a document into the stock ledger inside one transaction:
//!
//! ```text
//! resolve confirmer (before any lock)
//!   -> lock document, require draft (checked again after the lock)
//!   -> lock every touched Stock row in ascending (item, location) order
//!        purchase: open an empty row when the pair is new
//!        usage:    the row must exist
//!   -> apply lines in document order through the ledger
//!   -> mark confirmed, persist, commit
//! ```
//!
//! Any failure drops the transaction, so no line is applied unless all are.
//! Everything up to the commit is bounded by `confirm_timeout`; an expired
//! call drops the transaction the same way. The commit itself runs outside
//! the deadline, so a `Timeout` always means nothing was written.
//! Confirmation is not idempotent: a second call on the same document fails
//! with `InvalidState`.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use stockkeep_core::{DocumentId, DomainError, StockKey, UserId};
use stockkeep_documents::{Document, PurchaseRecord, UsageRecord};
use stockkeep_stock::Stock;

use crate::config::{DEFAULT_CONFIRM_TIMEOUT, InfraConfig};
use crate::documents::load_as;
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::StockLedger;
use crate::reference::{ReferenceLookup, resolve_user};
use crate::store::{InventoryStore, StoreError, StoreTx};

#[derive(Debug, Clone)]
pub struct ConfirmationWorkflow<S, R, D> {
    ledger: StockLedger<S, R>,
    confirm_timeout: Duration,
    _document: PhantomData<fn() -> D>,
}

pub type PurchaseConfirmation<S, R> = ConfirmationWorkflow<S, R, PurchaseRecord>;
pub type UsageConfirmation<S, R> = ConfirmationWorkflow<S, R, UsageRecord>;

impl<S, R, D> ConfirmationWorkflow<S, R, D>
where
    S: InventoryStore,
    R: ReferenceLookup,
    D: Document,
{
    pub fn new(ledger: StockLedger<S, R>) -> Self {
        Self {
            ledger,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            _document: PhantomData,
        }
    }

    /// Workflow bounded by `config.confirm_timeout`.
    pub fn from_config(ledger: StockLedger<S, R>, config: &InfraConfig) -> Self {
        Self::new(ledger).with_timeout(config.confirm_timeout)
    }

    pub fn with_timeout(mut self, confirm_timeout: Duration) -> Self {
        self.confirm_timeout = confirm_timeout;
        self
    }

    pub fn confirm_timeout(&self) -> Duration {
        self.confirm_timeout
    }

    pub fn ledger(&self) -> &StockLedger<S, R> {
        &self.ledger
    }

    /// Confirm a draft document in its own transaction.
    #[instrument(
        skip(self, remarks),
        fields(document_id = %id, kind = %D::KIND),
        err
    )]
    pub async fn confirm(
        &self,
        id: DocumentId,
        confirmed_by: Option<UserId>,
        remarks: Option<String>,
    ) -> ServiceResult<D> {
        let limit = self.confirm_timeout;
        let staged = tokio::time::timeout(limit, self.stage(id, confirmed_by, remarks)).await;

        let (tx, doc) = match staged {
            Ok(Ok(staged)) => staged,
            Ok(Err(err)) => {
                if err.is_user_actionable() {
                    warn!(error = %err, "confirmation rejected");
                }
                return Err(err);
            }
            Err(_) => {
                warn!(timeout = ?limit, "confirmation timed out; rolled back");
                return Err(ServiceError::Timeout(limit));
            }
        };

        tx.commit().await?;
        info!(code = doc.code(), "document confirmed");
        Ok(doc)
    }

    /// Run the confirmation in a fresh transaction and hand it back uncommitted.
    async fn stage(
        &self,
        id: DocumentId,
        confirmed_by: Option<UserId>,
        remarks: Option<String>,
    ) -> ServiceResult<(S::Tx, D)> {
        let mut tx = self.ledger.store().begin().await?;
        let doc = self.confirm_in(&mut tx, id, confirmed_by, remarks).await?;
        Ok((tx, doc))
    }

    /// Confirm inside a caller-owned transaction. Nothing is visible until the
    /// caller commits; dropping `tx` undoes every line.
    pub async fn confirm_in(
        &self,
        tx: &mut S::Tx,
        id: DocumentId,
        confirmed_by: Option<UserId>,
        remarks: Option<String>,
    ) -> ServiceResult<D> {
        if let Some(user) = confirmed_by {
            resolve_user(self.ledger.refs(), user).await?;
        }

        // Cheap rejection before waiting on any lock.
        load_as::<D>(tx.get_document(id).await?, id)?.ensure_draft("confirmed")?;

        let mut doc = load_as::<D>(tx.lock_document(id).await?, id)?;
        doc.ensure_draft("confirmed")?;

        let plan = doc.plan_confirmation();
        let kind = plan.kind();
        let now = Utc::now();

        let mut rows: BTreeMap<StockKey, Stock> = BTreeMap::new();
        for key in plan.lock_order() {
            let stock = if kind.creates_missing_stock() {
                // A row opened by this receipt carries the confirm remarks as its memo.
                let mut receipt = plan.seed_for(key);
                receipt.memo = remarks.clone();
                let seed = Stock::for_receipt(*key, &receipt, now);
                let (stock, created) = tx.lock_or_insert_stock(seed).await?;
                if created {
                    debug!(key = %key, "opened empty stock row");
                }
                stock
            } else {
                tx.lock_stock_by_key(*key).await?.ok_or_else(|| {
                    DomainError::InsufficientStock {
                        item_id: key.item_id,
                        location_id: key.location_id,
                        available: Decimal::ZERO,
                        requested: plan
                            .lines()
                            .iter()
                            .filter(|l| l.key == *key)
                            .map(|l| l.quantity)
                            .sum(),
                    }
                })?
            };
            debug!(key = %key, quantity = %stock.quantity(), "stock row locked");
            rows.insert(*key, stock);
        }

        for line in plan.lines() {
            let mut stock = rows.remove(&line.key).ok_or_else(|| {
                ServiceError::Store(StoreError::Backend(format!(
                    "stock row for {} was not locked",
                    line.key
                )))
            })?;

            if !kind.creates_missing_stock() && stock.quantity() < line.quantity {
                return Err(DomainError::InsufficientStock {
                    item_id: line.key.item_id,
                    location_id: line.key.location_id,
                    available: stock.quantity(),
                    requested: line.quantity,
                }
                .into());
            }
            if let Some(seed) = &line.receipt {
                stock.record_receipt(seed, now);
            }

            let request = plan.request_for(line, remarks.clone(), confirmed_by);
            let (stock, _) = self.ledger.apply_locked(tx, stock, &request).await?;
            rows.insert(line.key, stock);
        }

        doc.mark_confirmed(confirmed_by, remarks, now)?;
        tx.update_document(&doc.clone().into_any()).await?;
        Ok(doc)
    }
}
