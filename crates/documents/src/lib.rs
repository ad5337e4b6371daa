//! Stock documents domain module.
//!
//! Purchase intake and usage consumption documents share one lifecycle:
//! they are edited freely while `draft`, and `confirm` is a one-way step that
//! freezes them and pushes their lines into the stock ledger. This crate holds
//! the pure rules for that lifecycle (no IO, no locking); the transactional
//! confirmation itself lives in the infrastructure layer.

pub mod confirmation;
pub mod document;
pub mod header;
pub mod purchase;
pub mod usage;

pub use confirmation::{ConfirmationPlan, PlannedLine};
pub use document::{AnyDocument, Document, DocumentInput, DocumentKind};
pub use header::{DocumentHeader, DocumentStatus};
pub use purchase::{
    NewPurchaseRecord, PurchaseLine, PurchaseLineInput, PurchaseRecord, PurchaseRecordParts,
    PurchaseRecordPatch,
};
pub use usage::{
    NewUsageRecord, UsageLine, UsageLineInput, UsageRecord, UsageRecordParts, UsageRecordPatch,
    UsageType,
};
