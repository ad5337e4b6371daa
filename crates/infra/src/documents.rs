//! Draft document management: create, edit, remove, cancel, read.
//!
//! Every write is refused unless the document is still a draft. Confirmation
//! lives in [`crate::workflow`].

use std::marker::PhantomData;

use chrono::Utc;
use tracing::{info, instrument};

use stockkeep_core::{DocumentId, DomainError};
use stockkeep_documents::{AnyDocument, Document, DocumentInput, PurchaseRecord, UsageRecord};

use crate::error::ServiceResult;
use crate::reference::{ReferenceLookup, resolve_keys, resolve_users};
use crate::store::{InventoryStore, StoreTx};

#[derive(Debug, Clone)]
pub struct DocumentService<S, R, D> {
    store: S,
    refs: R,
    _document: PhantomData<fn() -> D>,
}

pub type PurchaseRecords<S, R> = DocumentService<S, R, PurchaseRecord>;
pub type UsageRecords<S, R> = DocumentService<S, R, UsageRecord>;

impl<S, R, D> DocumentService<S, R, D>
where
    S: InventoryStore,
    R: ReferenceLookup,
    D: Document,
{
    pub fn new(store: S, refs: R) -> Self {
        Self {
            store,
            refs,
            _document: PhantomData,
        }
    }

    /// Create a draft. Every referenced item, location and user must resolve
    /// and the code must be unused.
    #[instrument(skip(self, draft), fields(kind = %D::KIND), err)]
    pub async fn create(&self, draft: D::Draft) -> ServiceResult<D> {
        self.resolve_input(&draft).await?;
        let doc = D::create(draft, Utc::now())?;

        let mut tx = self.store.begin().await?;
        if tx.document_code_exists(D::KIND, doc.code()).await? {
            return Err(DomainError::DuplicateCode(doc.code().to_string()).into());
        }
        tx.insert_document(&doc.clone().into_any()).await?;
        tx.commit().await?;

        info!(document_id = %doc.header().id, code = doc.code(), "document created");
        Ok(doc)
    }

    /// Edit a draft. Supplied lines replace the stored ones wholesale.
    #[instrument(skip(self, patch), fields(kind = %D::KIND, document_id = %id), err)]
    pub async fn update(&self, id: DocumentId, patch: D::Patch) -> ServiceResult<D> {
        self.resolve_input(&patch).await?;

        let mut tx = self.store.begin().await?;
        let mut doc = load_as::<D>(tx.lock_document(id).await?, id)?;
        doc.apply_patch(patch, Utc::now())?;
        tx.update_document(&doc.clone().into_any()).await?;
        tx.commit().await?;

        info!("document updated");
        Ok(doc)
    }

    /// Delete a draft and its lines.
    #[instrument(skip(self), fields(kind = %D::KIND, document_id = %id), err)]
    pub async fn remove(&self, id: DocumentId) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        let doc = load_as::<D>(tx.lock_document(id).await?, id)?;
        doc.ensure_draft("removed")?;
        tx.delete_document(id).await?;
        tx.commit().await?;

        info!("document removed");
        Ok(())
    }

    /// `draft -> cancelled`. Cancelled documents are frozen.
    #[instrument(skip(self), fields(kind = %D::KIND, document_id = %id), err)]
    pub async fn cancel(&self, id: DocumentId) -> ServiceResult<D> {
        let mut tx = self.store.begin().await?;
        let mut doc = load_as::<D>(tx.lock_document(id).await?, id)?;
        doc.mark_cancelled(Utc::now())?;
        tx.update_document(&doc.clone().into_any()).await?;
        tx.commit().await?;

        info!("document cancelled");
        Ok(doc)
    }

    pub async fn get(&self, id: DocumentId) -> ServiceResult<D> {
        let mut tx = self.store.begin().await?;
        load_as::<D>(tx.get_document(id).await?, id)
    }

    /// All documents of this kind, newest document date first.
    pub async fn list(&self) -> ServiceResult<Vec<D>> {
        let mut tx = self.store.begin().await?;
        Ok(tx
            .list_documents(D::KIND)
            .await?
            .into_iter()
            .filter_map(D::from_any)
            .collect())
    }

    async fn resolve_input(&self, input: &impl DocumentInput) -> ServiceResult<()> {
        resolve_users(&self.refs, &input.users()).await?;
        resolve_keys(&self.refs, &input.stock_keys()).await
    }
}

/// Narrow a stored document to `D`; a missing id or a document of the other
/// kind is `NotFound`.
pub(crate) fn load_as<D: Document>(doc: Option<AnyDocument>, id: DocumentId) -> ServiceResult<D> {
    doc.and_then(D::from_any)
        .ok_or_else(|| DomainError::not_found(format!("{} {id}", D::KIND.noun())).into())
}
