//! Transactional storage boundary for stock rows, adjustments and documents.
//!
//! Services never touch storage outside an explicit [`StoreTx`] session; the
//! session is passed through every step of a multi-step operation and is the
//! only unit of atomicity.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryInventoryStore, InMemoryTx};
pub use postgres::{PostgresInventoryStore, PostgresTx};
pub use r#trait::{InventoryStore, StoreError, StoreTx};
