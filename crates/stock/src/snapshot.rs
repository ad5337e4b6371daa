//! Read-only views handed to pollers outside the core (low-stock and expiry scanners).

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockkeep_core::{ItemId, LocationId, StockId};

use crate::stock::Stock;

/// Point-in-time view of one Stock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub stock_id: StockId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub min_quantity: Decimal,
    pub expiry_date: Option<NaiveDate>,
}

impl StockSnapshot {
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.min_quantity
    }

    /// True when the row expires on or before `today + lead_days`.
    pub fn expires_within(&self, today: NaiveDate, lead_days: u32) -> bool {
        let Some(expiry) = self.expiry_date else {
            return false;
        };
        match today.checked_add_days(Days::new(u64::from(lead_days))) {
            Some(horizon) => expiry <= horizon,
            None => true,
        }
    }
}

/// Listing filter for stock rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFilter {
    pub item_id: Option<ItemId>,
    pub location_id: Option<LocationId>,
    pub low_stock_only: bool,
}

impl StockFilter {
    pub fn matches(&self, stock: &Stock) -> bool {
        if self.item_id.is_some_and(|id| id != stock.item_id()) {
            return false;
        }
        if self.location_id.is_some_and(|id| id != stock.location_id()) {
            return false;
        }
        !self.low_stock_only || stock.is_low_stock()
    }
}
