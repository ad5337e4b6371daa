mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;

use common::{Harness, Refs, purchase_line};
use stockkeep_core::{DocumentId, StockId, StockKey};
use stockkeep_documents::{AnyDocument, Document, DocumentKind, DocumentStatus};
use stockkeep_infra::store::InMemoryTx;
use stockkeep_infra::{
    InMemoryInventoryStore, InventoryStore, PurchaseConfirmation, StockLedger, StoreError, StoreTx,
};
use stockkeep_stock::{Stock, StockAdjustment, StockFilter};

/// In-memory store whose commit takes `delay` before applying.
#[derive(Debug, Clone)]
struct SlowCommitStore {
    inner: InMemoryInventoryStore,
    delay: Duration,
}

struct SlowCommitTx {
    inner: InMemoryTx,
    delay: Duration,
}

#[async_trait]
impl InventoryStore for SlowCommitStore {
    type Tx = SlowCommitTx;

    async fn begin(&self) -> Result<SlowCommitTx, StoreError> {
        Ok(SlowCommitTx {
            inner: self.inner.begin().await?,
            delay: self.delay,
        })
    }
}

#[async_trait]
impl StoreTx for SlowCommitTx {
    async fn get_stock(&mut self, id: StockId) -> Result<Option<Stock>, StoreError> {
        self.inner.get_stock(id).await
    }

    async fn lock_stock(&mut self, id: StockId) -> Result<Option<Stock>, StoreError> {
        self.inner.lock_stock(id).await
    }

    async fn lock_stock_by_key(&mut self, key: StockKey) -> Result<Option<Stock>, StoreError> {
        self.inner.lock_stock_by_key(key).await
    }

    async fn lock_or_insert_stock(&mut self, seed: Stock) -> Result<(Stock, bool), StoreError> {
        self.inner.lock_or_insert_stock(seed).await
    }

    async fn insert_stock(&mut self, stock: &Stock) -> Result<(), StoreError> {
        self.inner.insert_stock(stock).await
    }

    async fn update_stock(&mut self, stock: &Stock) -> Result<(), StoreError> {
        self.inner.update_stock(stock).await
    }

    async fn delete_stock(&mut self, id: StockId) -> Result<(), StoreError> {
        self.inner.delete_stock(id).await
    }

    async fn list_stock(&mut self, filter: &StockFilter) -> Result<Vec<Stock>, StoreError> {
        self.inner.list_stock(filter).await
    }

    async fn append_adjustment(&mut self, adjustment: &StockAdjustment) -> Result<(), StoreError> {
        self.inner.append_adjustment(adjustment).await
    }

    async fn list_adjustments(
        &mut self,
        stock_id: StockId,
    ) -> Result<Vec<StockAdjustment>, StoreError> {
        self.inner.list_adjustments(stock_id).await
    }

    async fn get_document(&mut self, id: DocumentId) -> Result<Option<AnyDocument>, StoreError> {
        self.inner.get_document(id).await
    }

    async fn lock_document(&mut self, id: DocumentId) -> Result<Option<AnyDocument>, StoreError> {
        self.inner.lock_document(id).await
    }

    async fn document_code_exists(
        &mut self,
        kind: DocumentKind,
        code: &str,
    ) -> Result<bool, StoreError> {
        self.inner.document_code_exists(kind, code).await
    }

    async fn insert_document(&mut self, doc: &AnyDocument) -> Result<(), StoreError> {
        self.inner.insert_document(doc).await
    }

    async fn update_document(&mut self, doc: &AnyDocument) -> Result<(), StoreError> {
        self.inner.update_document(doc).await
    }

    async fn delete_document(&mut self, id: DocumentId) -> Result<(), StoreError> {
        self.inner.delete_document(id).await
    }

    async fn list_documents(&mut self, kind: DocumentKind) -> Result<Vec<AnyDocument>, StoreError> {
        self.inner.list_documents(kind).await
    }

    async fn stock_has_draft_references(&mut self, key: StockKey) -> Result<bool, StoreError> {
        self.inner.stock_has_draft_references(key).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.commit().await
    }
}

#[tokio::test]
async fn a_slow_commit_is_not_reported_as_a_timeout() {
    let h = Harness::new();
    let key = h.pair();
    let doc = h.purchase("PR-SLOW", vec![purchase_line(key, dec!(4))]).await;

    let slow = SlowCommitStore {
        inner: h.store.clone(),
        delay: Duration::from_millis(200),
    };
    let ledger: StockLedger<SlowCommitStore, Refs> = StockLedger::new(slow, Arc::clone(&h.refs));
    let workflow = PurchaseConfirmation::new(ledger).with_timeout(Duration::from_millis(50));

    let confirmed = workflow.confirm(doc.header().id, None, None).await.unwrap();

    assert_eq!(confirmed.status(), DocumentStatus::Confirmed);
    assert_eq!(h.quantity(key).await, Some(dec!(4)));
    assert_eq!(
        h.purchases.get(doc.header().id).await.unwrap().status(),
        DocumentStatus::Confirmed
    );
}
