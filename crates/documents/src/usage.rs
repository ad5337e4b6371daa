use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockkeep_core::quantity::ensure_positive;
use stockkeep_core::{
    DocumentId, DomainError, DomainResult, Entity, ItemId, LineId, LocationId, StockKey, UserId,
};

use crate::confirmation::{ConfirmationPlan, PlannedLine};
use crate::document::{AnyDocument, Document, DocumentInput, DocumentKind};
use crate::header::DocumentHeader;
use crate::purchase::{MAX_REMARKS_LEN, check_len};

/// Why stock was consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageType {
    #[default]
    Daily,
    Expired,
    Damaged,
    Gift,
    Other,
}

impl UsageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageType::Daily => "daily",
            UsageType::Expired => "expired",
            UsageType::Damaged => "damaged",
            UsageType::Gift => "gift",
            UsageType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(UsageType::Daily),
            "expired" => Ok(UsageType::Expired),
            "damaged" => Ok(UsageType::Damaged),
            "gift" => Ok(UsageType::Gift),
            "other" => Ok(UsageType::Other),
            _ => Err(DomainError::validation(format!(
                "unknown usage type '{}'",
                s.trim()
            ))),
        }
    }
}

impl core::fmt::Display for UsageType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLine {
    pub id: LineId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub remarks: Option<String>,
}

impl UsageLine {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_id, self.location_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLineInput {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub remarks: Option<String>,
}

impl UsageLineInput {
    pub fn new(item_id: ItemId, location_id: LocationId, quantity: Decimal) -> Self {
        Self {
            item_id,
            location_id,
            quantity,
            remarks: None,
        }
    }

    fn into_line(self) -> DomainResult<UsageLine> {
        let quantity = ensure_positive("quantity", self.quantity)?;
        check_len("line remarks", self.remarks.as_deref(), MAX_REMARKS_LEN)?;
        Ok(UsageLine {
            id: LineId::new(),
            item_id: self.item_id,
            location_id: self.location_id,
            quantity,
            remarks: self.remarks,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUsageRecord {
    pub code: String,
    pub created_by: UserId,
    pub usage_date: NaiveDate,
    pub usage_type: UsageType,
    pub remarks: Option<String>,
    pub lines: Vec<UsageLineInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecordPatch {
    pub created_by: Option<UserId>,
    pub usage_date: Option<NaiveDate>,
    pub usage_type: Option<UsageType>,
    pub remarks: Option<String>,
    pub lines: Option<Vec<UsageLineInput>>,
}

impl DocumentInput for NewUsageRecord {
    fn stock_keys(&self) -> Vec<StockKey> {
        input_keys(&self.lines)
    }

    fn users(&self) -> Vec<UserId> {
        vec![self.created_by]
    }
}

impl DocumentInput for UsageRecordPatch {
    fn stock_keys(&self) -> Vec<StockKey> {
        self.lines.as_deref().map(input_keys).unwrap_or_default()
    }

    fn users(&self) -> Vec<UserId> {
        self.created_by.into_iter().collect()
    }
}

/// Persisted shape of a usage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecordParts {
    pub header: DocumentHeader,
    pub usage_date: NaiveDate,
    pub usage_type: UsageType,
    pub lines: Vec<UsageLine>,
}

/// Stock consumption document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageRecord {
    parts: UsageRecordParts,
}

impl UsageRecord {
    pub fn from_parts(parts: UsageRecordParts) -> Self {
        Self { parts }
    }

    pub fn into_parts(self) -> UsageRecordParts {
        self.parts
    }

    pub fn parts(&self) -> &UsageRecordParts {
        &self.parts
    }

    pub fn lines(&self) -> &[UsageLine] {
        &self.parts.lines
    }

    pub fn usage_type(&self) -> UsageType {
        self.parts.usage_type
    }
}

impl Entity for UsageRecord {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.parts.header.id
    }
}

impl Document for UsageRecord {
    const KIND: DocumentKind = DocumentKind::Usage;

    type Draft = NewUsageRecord;
    type Patch = UsageRecordPatch;

    fn create(draft: NewUsageRecord, now: DateTime<Utc>) -> DomainResult<Self> {
        check_len("remarks", draft.remarks.as_deref(), MAX_REMARKS_LEN)?;
        let lines = build_lines(draft.lines)?;
        let header = DocumentHeader::draft(draft.code, draft.created_by, draft.remarks, now)?;
        Ok(Self {
            parts: UsageRecordParts {
                header,
                usage_date: draft.usage_date,
                usage_type: draft.usage_type,
                lines,
            },
        })
    }

    fn header(&self) -> &DocumentHeader {
        &self.parts.header
    }

    fn document_date(&self) -> NaiveDate {
        self.parts.usage_date
    }

    fn stock_keys(&self) -> Vec<StockKey> {
        self.parts.lines.iter().map(UsageLine::key).collect()
    }

    fn apply_patch(&mut self, patch: UsageRecordPatch, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_draft("updated")?;
        check_len("remarks", patch.remarks.as_deref(), MAX_REMARKS_LEN)?;

        if let Some(lines) = patch.lines {
            self.parts.lines = build_lines(lines)?;
        }
        if let Some(user) = patch.created_by {
            self.parts.header.created_by = user;
        }
        if let Some(date) = patch.usage_date {
            self.parts.usage_date = date;
        }
        if let Some(usage_type) = patch.usage_type {
            self.parts.usage_type = usage_type;
        }
        if patch.remarks.is_some() {
            self.parts.header.remarks = patch.remarks;
        }
        self.parts.header.touch(now);
        Ok(())
    }

    fn mark_confirmed(
        &mut self,
        confirmed_by: Option<UserId>,
        remarks: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        check_len("remarks", remarks.as_deref(), MAX_REMARKS_LEN)?;
        self.parts
            .header
            .mark_confirmed(Self::KIND.noun(), confirmed_by, remarks, now)
    }

    fn mark_cancelled(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.parts.header.mark_cancelled(Self::KIND.noun(), now)
    }

    fn plan_confirmation(&self) -> ConfirmationPlan {
        let lines = self
            .parts
            .lines
            .iter()
            .map(|line| PlannedLine {
                line_id: line.id,
                key: line.key(),
                quantity: line.quantity,
                receipt: None,
            })
            .collect();
        ConfirmationPlan::new(Self::KIND, lines)
    }

    fn into_any(self) -> AnyDocument {
        AnyDocument::Usage(self)
    }

    fn from_any(doc: AnyDocument) -> Option<Self> {
        match doc {
            AnyDocument::Usage(doc) => Some(doc),
            AnyDocument::Purchase(_) => None,
        }
    }
}

fn input_keys(lines: &[UsageLineInput]) -> Vec<StockKey> {
    lines
        .iter()
        .map(|l| StockKey::new(l.item_id, l.location_id))
        .collect()
}

fn build_lines(inputs: Vec<UsageLineInput>) -> DomainResult<Vec<UsageLine>> {
    if inputs.is_empty() {
        return Err(DomainError::validation("a usage record needs at least one line"));
    }
    inputs.into_iter().map(UsageLineInput::into_line).collect()
}
