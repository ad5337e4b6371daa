use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockkeep_core::quantity::{self, ensure_in_range, ensure_non_negative};
use stockkeep_core::{DomainError, DomainResult, Entity, ItemId, LocationId, StockId, StockKey};

use crate::adjustment::{AdjustmentRequest, AdjustmentType, StockAdjustment, reason};
use crate::snapshot::StockSnapshot;

/// Maximum length of a stock memo.
pub const MAX_MEMO_LEN: usize = 500;

/// Persisted shape of a Stock row.
///
/// Storage adapters read and write this; domain code goes through [`Stock`],
/// which keeps `quantity` behind the adjustment path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub id: StockId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub min_quantity: Decimal,
    pub latest_purchase_price: Option<Decimal>,
    pub latest_purchase_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Current quantity of one item at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stock {
    record: StockRecord,
}

/// Input for explicitly provisioning a Stock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStock {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub min_quantity: Decimal,
    pub latest_purchase_price: Option<Decimal>,
    pub latest_purchase_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub memo: Option<String>,
}

impl NewStock {
    pub fn new(item_id: ItemId, location_id: LocationId, quantity: Decimal) -> Self {
        Self {
            item_id,
            location_id,
            quantity,
            min_quantity: Decimal::ZERO,
            latest_purchase_price: None,
            latest_purchase_date: None,
            expiry_date: None,
            memo: None,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_id, self.location_id)
    }
}

/// Partial update of a Stock row. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPatch {
    pub quantity: Option<Decimal>,
    pub min_quantity: Option<Decimal>,
    pub latest_purchase_price: Option<Decimal>,
    pub latest_purchase_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub memo: Option<String>,
}

/// Metadata carried by a purchase line into the stock row it lands on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSeed {
    pub unit_price: Option<Decimal>,
    pub purchase_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub memo: Option<String>,
}

impl Stock {
    /// Rehydrate from storage.
    pub fn from_record(record: StockRecord) -> Self {
        Self { record }
    }

    pub fn into_record(self) -> StockRecord {
        self.record
    }

    pub fn record(&self) -> &StockRecord {
        &self.record
    }

    /// Provision a new row. The opening quantity is recorded as a
    /// `manual_audit` adjustment from 0.
    pub fn provision(new: NewStock, now: DateTime<Utc>) -> DomainResult<(Stock, StockAdjustment)> {
        if new.quantity < Decimal::ZERO {
            return Err(DomainError::NegativeQuantity {
                current: Decimal::ZERO,
                resulting: new.quantity,
            });
        }
        let opening = ensure_in_range("quantity", new.quantity)?;
        let min_quantity = ensure_non_negative("min_quantity", new.min_quantity)?;
        let price = new
            .latest_purchase_price
            .map(|p| ensure_non_negative("latest_purchase_price", p))
            .transpose()?;
        validate_memo(new.memo.as_deref())?;

        let id = StockId::new();
        let stock = Stock {
            record: StockRecord {
                id,
                item_id: new.item_id,
                location_id: new.location_id,
                quantity: opening,
                min_quantity,
                latest_purchase_price: price,
                latest_purchase_date: new.latest_purchase_date,
                expiry_date: new.expiry_date,
                memo: new.memo.clone(),
                created_at: now,
                updated_at: now,
            },
        };
        let adjustment = StockAdjustment::record(
            id,
            AdjustmentType::ManualAudit,
            Decimal::ZERO,
            opening,
            Some(reason::INITIAL_CREATE.to_string()),
            new.memo,
            None,
            now,
        );
        Ok((stock, adjustment))
    }

    /// An empty row created on first receipt. Quantity starts at 0 with no
    /// adjustment; the receipt itself is applied as a regular adjustment.
    pub fn for_receipt(key: StockKey, seed: &ReceiptSeed, now: DateTime<Utc>) -> Stock {
        Stock {
            record: StockRecord {
                id: StockId::new(),
                item_id: key.item_id,
                location_id: key.location_id,
                quantity: Decimal::ZERO,
                min_quantity: Decimal::ZERO,
                latest_purchase_price: seed.unit_price,
                latest_purchase_date: seed.purchase_date,
                expiry_date: seed.expiry_date,
                memo: seed.memo.clone(),
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn id_typed(&self) -> StockId {
        self.record.id
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.record.item_id, self.record.location_id)
    }

    pub fn item_id(&self) -> ItemId {
        self.record.item_id
    }

    pub fn location_id(&self) -> LocationId {
        self.record.location_id
    }

    pub fn quantity(&self) -> Decimal {
        self.record.quantity
    }

    pub fn min_quantity(&self) -> Decimal {
        self.record.min_quantity
    }

    pub fn latest_purchase_price(&self) -> Option<Decimal> {
        self.record.latest_purchase_price
    }

    pub fn latest_purchase_date(&self) -> Option<NaiveDate> {
        self.record.latest_purchase_date
    }

    pub fn expiry_date(&self) -> Option<NaiveDate> {
        self.record.expiry_date
    }

    pub fn memo(&self) -> Option<&str> {
        self.record.memo.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.record.updated_at
    }

    pub fn is_low_stock(&self) -> bool {
        self.record.quantity <= self.record.min_quantity
    }

    pub fn snapshot(&self) -> StockSnapshot {
        StockSnapshot {
            stock_id: self.record.id,
            item_id: self.record.item_id,
            location_id: self.record.location_id,
            quantity: self.record.quantity,
            min_quantity: self.record.min_quantity,
            expiry_date: self.record.expiry_date,
        }
    }

    /// Apply a signed delta. On error `self` is left untouched.
    pub fn apply_adjustment(
        &mut self,
        request: &AdjustmentRequest,
        now: DateTime<Utc>,
    ) -> DomainResult<StockAdjustment> {
        request.validate()?;

        let before = self.record.quantity;
        let after = quantity::checked_add("quantity", before, request.delta)?;
        if after < Decimal::ZERO {
            return Err(DomainError::NegativeQuantity {
                current: before,
                resulting: after,
            });
        }
        let after = ensure_in_range("quantity", after)?;

        self.record.quantity = after;
        self.record.updated_at = now;
        Ok(StockAdjustment::record(
            self.record.id,
            request.adjustment_type,
            before,
            after,
            request.reason.clone(),
            request.remarks.clone(),
            request.actor,
            now,
        ))
    }

    /// Apply a partial update.
    ///
    /// A quantity that differs from the current one yields a `manual_audit`
    /// adjustment covering the difference; every other field is metadata and
    /// changes without one. Validation happens before anything is modified.
    pub fn apply_patch(
        &mut self,
        patch: &StockPatch,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<StockAdjustment>> {
        let target = match patch.quantity {
            Some(q) if q < Decimal::ZERO => {
                return Err(DomainError::NegativeQuantity {
                    current: self.record.quantity,
                    resulting: q,
                });
            }
            Some(q) => Some(ensure_in_range("quantity", q)?),
            None => None,
        };
        let min_quantity = patch
            .min_quantity
            .map(|q| ensure_non_negative("min_quantity", q))
            .transpose()?;
        let price = patch
            .latest_purchase_price
            .map(|p| ensure_non_negative("latest_purchase_price", p))
            .transpose()?;
        validate_memo(patch.memo.as_deref())?;

        let adjustment = match target {
            Some(after) if after != self.record.quantity => {
                let before = self.record.quantity;
                self.record.quantity = after;
                Some(StockAdjustment::record(
                    self.record.id,
                    AdjustmentType::ManualAudit,
                    before,
                    after,
                    Some(reason::MANUAL_UPDATE.to_string()),
                    patch.memo.clone(),
                    None,
                    now,
                ))
            }
            _ => None,
        };

        if let Some(q) = min_quantity {
            self.record.min_quantity = q;
        }
        if price.is_some() {
            self.record.latest_purchase_price = price;
        }
        if patch.latest_purchase_date.is_some() {
            self.record.latest_purchase_date = patch.latest_purchase_date;
        }
        if patch.expiry_date.is_some() {
            self.record.expiry_date = patch.expiry_date;
        }
        if patch.memo.is_some() {
            self.record.memo = patch.memo.clone();
        }
        self.record.updated_at = now;

        Ok(adjustment)
    }

    /// Refresh purchase metadata after a confirmed receipt.
    pub fn record_receipt(&mut self, seed: &ReceiptSeed, now: DateTime<Utc>) {
        if seed.unit_price.is_some() {
            self.record.latest_purchase_price = seed.unit_price;
        }
        if seed.purchase_date.is_some() {
            self.record.latest_purchase_date = seed.purchase_date;
        }
        if seed.expiry_date.is_some() {
            self.record.expiry_date = seed.expiry_date;
        }
        self.record.updated_at = now;
    }
}

impl Entity for Stock {
    type Id = StockId;

    fn id(&self) -> &Self::Id {
        &self.record.id
    }
}

fn validate_memo(memo: Option<&str>) -> DomainResult<()> {
    match memo {
        Some(m) if m.chars().count() > MAX_MEMO_LEN => Err(DomainError::validation(format!(
            "memo must be at most {MAX_MEMO_LEN} characters"
        ))),
        _ => Ok(()),
    }
}
