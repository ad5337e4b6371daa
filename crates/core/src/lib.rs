//! `stockkeep-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod quantity;

pub use entity::Entity;
pub use error::{DomainError, DomainResult, ReferenceKind};
pub use id::{AdjustmentId, DocumentId, ItemId, LineId, LocationId, StockId, StockKey, UserId};
