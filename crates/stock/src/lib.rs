//! Stock ledger domain module.
//!
//! This crate contains the business rules for Stock rows and their append-only
//! adjustment trail, implemented purely as deterministic domain logic (no IO,
//! no storage, no locking). Every quantity change produced here comes paired
//! with the `StockAdjustment` that records it.

pub mod adjustment;
pub mod snapshot;
pub mod stock;

pub use adjustment::{AdjustmentRequest, AdjustmentType, StockAdjustment, reason};
pub use snapshot::{StockFilter, StockSnapshot};
pub use stock::{NewStock, ReceiptSeed, Stock, StockPatch, StockRecord};
