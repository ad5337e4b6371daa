//! Ledger work derived from a document before it is confirmed.
//!
//! A plan is computed outside any lock. It fixes two things the transactional
//! side relies on: the order in which Stock rows get locked (sorted, distinct
//! `StockKey`s) and the per-line signed deltas, applied in document order.

use std::collections::BTreeSet;

use rust_decimal::Decimal;

use stockkeep_core::{LineId, StockKey, UserId};
use stockkeep_stock::{AdjustmentRequest, ReceiptSeed};

use crate::document::DocumentKind;

/// One document line as the ledger sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLine {
    pub line_id: LineId,
    pub key: StockKey,
    /// Unsigned, always > 0.
    pub quantity: Decimal,
    /// Purchase metadata for the Stock row; `None` for usage lines.
    pub receipt: Option<ReceiptSeed>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPlan {
    kind: DocumentKind,
    lock_order: Vec<StockKey>,
    lines: Vec<PlannedLine>,
}

impl ConfirmationPlan {
    pub fn new(kind: DocumentKind, lines: Vec<PlannedLine>) -> Self {
        let lock_order = lines
            .iter()
            .map(|l| l.key)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self {
            kind,
            lock_order,
            lines,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// Distinct keys sorted by item id then location id.
    pub fn lock_order(&self) -> &[StockKey] {
        &self.lock_order
    }

    /// Lines in document order.
    pub fn lines(&self) -> &[PlannedLine] {
        &self.lines
    }

    pub fn signed_delta(&self, line: &PlannedLine) -> Decimal {
        self.kind.signed(line.quantity)
    }

    /// Metadata for an empty Stock row opened for `key`: the first line
    /// naming the pair wins.
    pub fn seed_for(&self, key: &StockKey) -> ReceiptSeed {
        self.lines
            .iter()
            .find(|l| l.key == *key)
            .and_then(|l| l.receipt.clone())
            .unwrap_or_default()
    }

    pub fn request_for(
        &self,
        line: &PlannedLine,
        remarks: Option<String>,
        actor: Option<UserId>,
    ) -> AdjustmentRequest {
        AdjustmentRequest::new(self.signed_delta(line), self.kind.adjustment_type())
            .with_reason(self.kind.reason())
            .with_remarks(remarks)
            .with_actor(actor)
    }
}
