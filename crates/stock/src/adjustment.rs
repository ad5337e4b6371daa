use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockkeep_core::{AdjustmentId, DomainError, DomainResult, StockId, UserId};

/// Reason codes written by the system itself.
pub mod reason {
    pub const INITIAL_CREATE: &str = "initial_create";
    pub const MANUAL_UPDATE: &str = "manual_update";
    pub const PURCHASE_CONFIRMED: &str = "purchase_confirmed";
    pub const USAGE_CONFIRMED: &str = "usage_confirmed";
}

/// Maximum length of an adjustment reason code.
pub const MAX_REASON_LEN: usize = 64;

/// Why a stock quantity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    ManualAudit,
    Purchase,
    Usage,
    Correction,
}

impl AdjustmentType {
    /// Canonical storage spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentType::ManualAudit => "manual_audit",
            AdjustmentType::Purchase => "purchase",
            AdjustmentType::Usage => "usage",
            AdjustmentType::Correction => "correction",
        }
    }

    /// Parse a loosely spelled adjustment type.
    ///
    /// The input is trimmed, camelCase/PascalCase boundaries get an `_`,
    /// runs of spaces and hyphens become `_`, and the result is lowercased.
    /// The normalized token is then mapped:
    ///
    /// | normalized               | type          |
    /// |--------------------------|---------------|
    /// | `manual`, `manual_audit` | `ManualAudit` |
    /// | `purchase`               | `Purchase`    |
    /// | `usage`                  | `Usage`       |
    /// | `correction`             | `Correction`  |
    ///
    /// Anything else is a validation error.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let normalized = normalize_token(input);
        match normalized.as_str() {
            "manual" | "manual_audit" => Ok(AdjustmentType::ManualAudit),
            "purchase" => Ok(AdjustmentType::Purchase),
            "usage" => Ok(AdjustmentType::Usage),
            "correction" => Ok(AdjustmentType::Correction),
            _ => Err(DomainError::validation(format!(
                "unknown adjustment type '{}' (expected one of: manual_audit, purchase, usage, correction)",
                input.trim()
            ))),
        }
    }
}

impl core::fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AdjustmentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn normalize_token(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    let mut prev: Option<char> = None;
    let mut pending_sep = false;

    for c in input.trim().chars() {
        if c == ' ' || c == '-' || c == '_' || c.is_whitespace() {
            pending_sep = true;
            prev = Some(c);
            continue;
        }
        let boundary = c.is_uppercase()
            && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
        if (pending_sep || boundary) && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.extend(c.to_lowercase());
        prev = Some(c);
    }
    out
}

/// A requested change to one stock row's quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    /// Signed change; negative values take stock out.
    pub delta: Decimal,
    pub adjustment_type: AdjustmentType,
    pub reason: Option<String>,
    pub remarks: Option<String>,
    pub actor: Option<UserId>,
}

impl AdjustmentRequest {
    pub fn new(delta: Decimal, adjustment_type: AdjustmentType) -> Self {
        Self {
            delta,
            adjustment_type,
            reason: None,
            remarks: None,
            actor: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_remarks(mut self, remarks: Option<String>) -> Self {
        self.remarks = remarks;
        self
    }

    pub fn with_actor(mut self, actor: Option<UserId>) -> Self {
        self.actor = actor;
        self
    }

    pub(crate) fn validate(&self) -> DomainResult<()> {
        if let Some(reason) = &self.reason {
            if reason.chars().count() > MAX_REASON_LEN {
                return Err(DomainError::validation(format!(
                    "reason must be at most {MAX_REASON_LEN} characters"
                )));
            }
        }
        Ok(())
    }
}

/// Immutable audit record of a single quantity change.
///
/// Written in the same transaction as the quantity it describes and never
/// updated or deleted afterwards (it only goes away with its stock row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub id: AdjustmentId,
    pub stock_id: StockId,
    pub adjustment_type: AdjustmentType,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
    /// Always `quantity_after - quantity_before`.
    pub delta: Decimal,
    pub reason: Option<String>,
    pub remarks: Option<String>,
    pub actor: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl StockAdjustment {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record(
        stock_id: StockId,
        adjustment_type: AdjustmentType,
        quantity_before: Decimal,
        quantity_after: Decimal,
        reason: Option<String>,
        remarks: Option<String>,
        actor: Option<UserId>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AdjustmentId::new(),
            stock_id,
            adjustment_type,
            quantity_before,
            quantity_after,
            delta: quantity_after - quantity_before,
            reason,
            remarks,
            actor,
            created_at: at,
        }
    }
}
