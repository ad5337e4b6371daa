//! Infrastructure layer: storage, reference lookups, services, config.
//!
//! - [`store`]: transactional storage boundary (in-memory and PostgreSQL)
//! - [`ledger`]: the only writer of stock quantities
//! - [`workflow`]: document confirmation
//! - [`documents`]: draft document management

pub mod config;
pub mod documents;
pub mod error;
pub mod ledger;
pub mod reference;
pub mod store;
pub mod workflow;

pub use config::InfraConfig;
pub use documents::{DocumentService, PurchaseRecords, UsageRecords};
pub use error::{ServiceError, ServiceResult};
pub use ledger::StockLedger;
pub use reference::{InMemoryReferenceData, PostgresReferenceData, ReferenceLookup};
pub use store::{
    InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreError, StoreTx,
};
pub use workflow::{ConfirmationWorkflow, PurchaseConfirmation, UsageConfirmation};
