//! Domain error model.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::id::{ItemId, LocationId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Kind of reference data a request points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Item,
    Location,
    User,
}

impl core::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ReferenceKind::Item => "item",
            ReferenceKind::Location => "location",
            ReferenceKind::User => "user",
        };
        f.write_str(s)
    }
}

/// Domain-level error.
///
/// Every variant is a deterministic, user-actionable failure detected before or
/// during a transaction. Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced stock row or document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An item, location or user referenced by a request does not exist.
    ///
    /// A `User` reference in the actor/confirmer position is an unknown actor.
    #[error("unknown {kind} {id}")]
    UnknownReference { kind: ReferenceKind, id: Uuid },

    /// A Stock row for this (item, location) pair already exists.
    #[error("stock for item {item_id} at location {location_id} already exists")]
    DuplicateStockPair {
        item_id: ItemId,
        location_id: LocationId,
    },

    /// A document with this code already exists.
    #[error("document code {0} already exists")]
    DuplicateCode(String),

    /// The operation is not permitted in the document's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The change would drive a stock quantity below zero.
    /// `resulting` is the quantity the change would have produced.
    #[error("quantity cannot be negative (current {current}, resulting {resulting})")]
    NegativeQuantity { current: Decimal, resulting: Decimal },

    /// A usage line requests more than the stock row currently holds.
    #[error(
        "insufficient stock for item {item_id} at location {location_id} (available {available}, requested {requested})"
    )]
    InsufficientStock {
        item_id: ItemId,
        location_id: LocationId,
        available: Decimal,
        requested: Decimal,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn unknown(kind: ReferenceKind, id: impl Into<Uuid>) -> Self {
        Self::UnknownReference {
            kind,
            id: id.into(),
        }
    }

    /// True when a user referenced as the acting party does not exist.
    pub fn is_unknown_actor(&self) -> bool {
        matches!(
            self,
            DomainError::UnknownReference {
                kind: ReferenceKind::User,
                ..
            }
        )
    }
}
