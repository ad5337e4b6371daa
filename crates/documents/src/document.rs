use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockkeep_core::{DocumentId, DomainResult, Entity, StockKey, UserId};
use stockkeep_stock::{AdjustmentType, reason};

use crate::confirmation::ConfirmationPlan;
use crate::header::{DocumentHeader, DocumentStatus};
use crate::purchase::PurchaseRecord;
use crate::usage::UsageRecord;

/// Which way a document moves stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Purchase,
    Usage,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Purchase => "purchase",
            DocumentKind::Usage => "usage",
        }
    }

    /// Human-readable noun used in error messages.
    pub fn noun(&self) -> &'static str {
        match self {
            DocumentKind::Purchase => "purchase record",
            DocumentKind::Usage => "usage record",
        }
    }

    pub fn adjustment_type(&self) -> AdjustmentType {
        match self {
            DocumentKind::Purchase => AdjustmentType::Purchase,
            DocumentKind::Usage => AdjustmentType::Usage,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            DocumentKind::Purchase => reason::PURCHASE_CONFIRMED,
            DocumentKind::Usage => reason::USAGE_CONFIRMED,
        }
    }

    /// Purchases open an empty Stock row for a pair seen for the first time;
    /// usage requires the row to exist.
    pub fn creates_missing_stock(&self) -> bool {
        matches!(self, DocumentKind::Purchase)
    }

    /// Signed ledger delta for a line quantity.
    pub fn signed(&self, quantity: Decimal) -> Decimal {
        match self {
            DocumentKind::Purchase => quantity,
            DocumentKind::Usage => -quantity,
        }
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything carrying references that must resolve before a write.
pub trait DocumentInput {
    /// (item, location) pairs named by the input's lines.
    fn stock_keys(&self) -> Vec<StockKey>;

    /// Users named by the input.
    fn users(&self) -> Vec<UserId>;
}

/// A stock document: purchase intake or usage consumption.
pub trait Document: Entity<Id = DocumentId> + Clone + Send + Sync + Sized + 'static {
    const KIND: DocumentKind;

    type Draft: DocumentInput + Send + Sync;
    type Patch: DocumentInput + Send + Sync;

    /// Build a new draft. Status is always `draft` regardless of input.
    fn create(draft: Self::Draft, now: DateTime<Utc>) -> DomainResult<Self>;

    fn header(&self) -> &DocumentHeader;

    /// Business date of the document (purchase date / usage date).
    fn document_date(&self) -> NaiveDate;

    fn stock_keys(&self) -> Vec<StockKey>;

    /// Apply an edit. A supplied line list replaces the existing one wholesale.
    fn apply_patch(&mut self, patch: Self::Patch, now: DateTime<Utc>) -> DomainResult<()>;

    fn mark_confirmed(
        &mut self,
        confirmed_by: Option<UserId>,
        remarks: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()>;

    fn mark_cancelled(&mut self, now: DateTime<Utc>) -> DomainResult<()>;

    /// Ledger work a confirmation of this document performs.
    fn plan_confirmation(&self) -> ConfirmationPlan;

    fn into_any(self) -> AnyDocument;
    fn from_any(doc: AnyDocument) -> Option<Self>;

    fn code(&self) -> &str {
        &self.header().code
    }

    fn status(&self) -> DocumentStatus {
        self.header().status
    }

    fn ensure_draft(&self, action: &str) -> DomainResult<()> {
        self.header().ensure_draft(Self::KIND.noun(), action)
    }
}

/// Either kind of document, as kept by storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnyDocument {
    Purchase(PurchaseRecord),
    Usage(UsageRecord),
}

impl AnyDocument {
    pub fn kind(&self) -> DocumentKind {
        match self {
            AnyDocument::Purchase(_) => DocumentKind::Purchase,
            AnyDocument::Usage(_) => DocumentKind::Usage,
        }
    }

    pub fn header(&self) -> &DocumentHeader {
        match self {
            AnyDocument::Purchase(doc) => doc.header(),
            AnyDocument::Usage(doc) => doc.header(),
        }
    }

    pub fn id(&self) -> DocumentId {
        self.header().id
    }

    pub fn document_date(&self) -> NaiveDate {
        match self {
            AnyDocument::Purchase(doc) => doc.document_date(),
            AnyDocument::Usage(doc) => doc.document_date(),
        }
    }

    pub fn stock_keys(&self) -> Vec<StockKey> {
        match self {
            AnyDocument::Purchase(doc) => doc.stock_keys(),
            AnyDocument::Usage(doc) => doc.stock_keys(),
        }
    }

    /// True for a draft whose lines name `key`.
    pub fn is_draft_referencing(&self, key: &StockKey) -> bool {
        self.header().status == DocumentStatus::Draft && self.stock_keys().contains(key)
    }
}
