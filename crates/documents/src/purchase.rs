use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockkeep_core::quantity::{self, ensure_non_negative, ensure_positive};
use stockkeep_core::{
    DocumentId, DomainError, DomainResult, Entity, ItemId, LineId, LocationId, StockKey, UserId,
};
use stockkeep_stock::ReceiptSeed;

use crate::confirmation::{ConfirmationPlan, PlannedLine};
use crate::document::{AnyDocument, Document, DocumentInput, DocumentKind};
use crate::header::DocumentHeader;

pub const MAX_STORE_NAME_LEN: usize = 128;
pub const MAX_STORE_TYPE_LEN: usize = 16;
pub const MAX_REMARKS_LEN: usize = 255;

/// One received line of a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub id: LineId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub total_price: Option<Decimal>,
    pub expiry_date: Option<NaiveDate>,
    pub remarks: Option<String>,
}

impl PurchaseLine {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_id, self.location_id)
    }
}

/// Caller-supplied line content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLineInput {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub total_price: Option<Decimal>,
    pub expiry_date: Option<NaiveDate>,
    pub remarks: Option<String>,
}

impl PurchaseLineInput {
    pub fn new(item_id: ItemId, location_id: LocationId, quantity: Decimal) -> Self {
        Self {
            item_id,
            location_id,
            quantity,
            unit_price: None,
            total_price: None,
            expiry_date: None,
            remarks: None,
        }
    }

    pub fn with_unit_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    pub fn with_expiry(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    fn into_line(self) -> DomainResult<PurchaseLine> {
        let quantity = ensure_positive("quantity", self.quantity)?;
        let unit_price = self
            .unit_price
            .map(|p| ensure_non_negative("unit_price", p))
            .transpose()?;
        let total_price = match self.total_price {
            Some(total) => Some(ensure_non_negative("total_price", total)?),
            None => unit_price
                .map(|p| quantity::checked_mul("total_price", p, quantity))
                .transpose()?,
        };
        check_len("line remarks", self.remarks.as_deref(), MAX_REMARKS_LEN)?;
        Ok(PurchaseLine {
            id: LineId::new(),
            item_id: self.item_id,
            location_id: self.location_id,
            quantity,
            unit_price,
            total_price,
            expiry_date: self.expiry_date,
            remarks: self.remarks,
        })
    }
}

/// Input for a new purchase draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseRecord {
    pub code: String,
    pub created_by: UserId,
    pub purchase_date: NaiveDate,
    pub store_name: Option<String>,
    pub store_type: Option<String>,
    pub remarks: Option<String>,
    pub lines: Vec<PurchaseLineInput>,
}

/// Edit of a purchase draft. `None` leaves a field unchanged; `lines`
/// replaces the whole line set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecordPatch {
    pub created_by: Option<UserId>,
    pub purchase_date: Option<NaiveDate>,
    pub store_name: Option<String>,
    pub store_type: Option<String>,
    pub remarks: Option<String>,
    pub lines: Option<Vec<PurchaseLineInput>>,
}

impl DocumentInput for NewPurchaseRecord {
    fn stock_keys(&self) -> Vec<StockKey> {
        input_keys(&self.lines)
    }

    fn users(&self) -> Vec<UserId> {
        vec![self.created_by]
    }
}

impl DocumentInput for PurchaseRecordPatch {
    fn stock_keys(&self) -> Vec<StockKey> {
        self.lines.as_deref().map(input_keys).unwrap_or_default()
    }

    fn users(&self) -> Vec<UserId> {
        self.created_by.into_iter().collect()
    }
}

/// Persisted shape of a purchase record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecordParts {
    pub header: DocumentHeader,
    pub purchase_date: NaiveDate,
    pub store_name: Option<String>,
    pub store_type: Option<String>,
    pub total_amount: Decimal,
    pub lines: Vec<PurchaseLine>,
}

/// Stock intake document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseRecord {
    parts: PurchaseRecordParts,
}

impl PurchaseRecord {
    pub fn from_parts(parts: PurchaseRecordParts) -> Self {
        Self { parts }
    }

    pub fn into_parts(self) -> PurchaseRecordParts {
        self.parts
    }

    pub fn parts(&self) -> &PurchaseRecordParts {
        &self.parts
    }

    pub fn lines(&self) -> &[PurchaseLine] {
        &self.parts.lines
    }

    pub fn total_amount(&self) -> Decimal {
        self.parts.total_amount
    }

    pub fn store_name(&self) -> Option<&str> {
        self.parts.store_name.as_deref()
    }

    pub fn store_type(&self) -> Option<&str> {
        self.parts.store_type.as_deref()
    }

    fn replace_lines(&mut self, inputs: Vec<PurchaseLineInput>) -> DomainResult<()> {
        let lines = build_lines(inputs)?;
        self.parts.total_amount = total_of(&lines)?;
        self.parts.lines = lines;
        Ok(())
    }
}

impl Entity for PurchaseRecord {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.parts.header.id
    }
}

impl Document for PurchaseRecord {
    const KIND: DocumentKind = DocumentKind::Purchase;

    type Draft = NewPurchaseRecord;
    type Patch = PurchaseRecordPatch;

    fn create(draft: NewPurchaseRecord, now: DateTime<Utc>) -> DomainResult<Self> {
        check_len("store_name", draft.store_name.as_deref(), MAX_STORE_NAME_LEN)?;
        check_len("store_type", draft.store_type.as_deref(), MAX_STORE_TYPE_LEN)?;
        check_len("remarks", draft.remarks.as_deref(), MAX_REMARKS_LEN)?;
        let lines = build_lines(draft.lines)?;
        let total_amount = total_of(&lines)?;
        let header = DocumentHeader::draft(draft.code, draft.created_by, draft.remarks, now)?;

        Ok(Self {
            parts: PurchaseRecordParts {
                header,
                purchase_date: draft.purchase_date,
                store_name: draft.store_name,
                store_type: draft.store_type,
                total_amount,
                lines,
            },
        })
    }

    fn header(&self) -> &DocumentHeader {
        &self.parts.header
    }

    fn document_date(&self) -> NaiveDate {
        self.parts.purchase_date
    }

    fn stock_keys(&self) -> Vec<StockKey> {
        self.parts.lines.iter().map(PurchaseLine::key).collect()
    }

    fn apply_patch(&mut self, patch: PurchaseRecordPatch, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_draft("updated")?;
        check_len("store_name", patch.store_name.as_deref(), MAX_STORE_NAME_LEN)?;
        check_len("store_type", patch.store_type.as_deref(), MAX_STORE_TYPE_LEN)?;
        check_len("remarks", patch.remarks.as_deref(), MAX_REMARKS_LEN)?;

        // Lines are validated before any header field moves.
        if let Some(lines) = patch.lines {
            self.replace_lines(lines)?;
        }
        if let Some(user) = patch.created_by {
            self.parts.header.created_by = user;
        }
        if let Some(date) = patch.purchase_date {
            self.parts.purchase_date = date;
        }
        if patch.store_name.is_some() {
            self.parts.store_name = patch.store_name;
        }
        if patch.store_type.is_some() {
            self.parts.store_type = patch.store_type;
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
                receipt: Some(ReceiptSeed {
                    unit_price: line.unit_price,
                    purchase_date: Some(self.parts.purchase_date),
                    expiry_date: line.expiry_date,
                    memo: None,
                }),
            })
            .collect();
        ConfirmationPlan::new(Self::KIND, lines)
    }

    fn into_any(self) -> AnyDocument {
        AnyDocument::Purchase(self)
    }

    fn from_any(doc: AnyDocument) -> Option<Self> {
        match doc {
            AnyDocument::Purchase(doc) => Some(doc),
            AnyDocument::Usage(_) => None,
        }
    }
}

fn input_keys(lines: &[PurchaseLineInput]) -> Vec<StockKey> {
    lines
        .iter()
        .map(|l| StockKey::new(l.item_id, l.location_id))
        .collect()
}

fn build_lines(inputs: Vec<PurchaseLineInput>) -> DomainResult<Vec<PurchaseLine>> {
    if inputs.is_empty() {
        return Err(DomainError::validation(
            "a purchase record needs at least one line",
        ));
    }
    inputs.into_iter().map(PurchaseLineInput::into_line).collect()
}

fn total_of(lines: &[PurchaseLine]) -> DomainResult<Decimal> {
    quantity::checked_sum("total_amount", lines.iter().filter_map(|l| l.total_price))
}

pub(crate) fn check_len(field: &str, value: Option<&str>, max: usize) -> DomainResult<()> {
    match value {
        Some(v) if v.chars().count() > max => Err(DomainError::validation(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DocumentStatus;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
    }

    fn draft(lines: Vec<PurchaseLineInput>) -> NewPurchaseRecord {
        NewPurchaseRecord {
            code: "PR-0001".to_string(),
            created_by: UserId::new(),
            purchase_date: date(),
            store_name: Some("Corner Market".to_string()),
            store_type: Some("retail".to_string()),
            remarks: None,
            lines,
        }
    }

    #[test]
    fn total_defaults_to_unit_price_times_quantity() {
        let item = ItemId::new();
        let loc = LocationId::new();
        let mut explicit = PurchaseLineInput::new(item, loc, dec!(1));
        explicit.total_price = Some(dec!(9.99));
        let lines = vec![
            PurchaseLineInput::new(item, loc, dec!(4)).with_unit_price(dec!(12)),
            PurchaseLineInput::new(item, loc, dec!(3)).with_unit_price(dec!(0.335)),
            explicit,
            PurchaseLineInput::new(item, loc, dec!(2)),
        ];

        let record = PurchaseRecord::create(draft(lines), Utc::now()).unwrap();

        assert_eq!(record.lines()[0].total_price, Some(dec!(48)));
        // 0.335 rounds to 0.34 before the multiplication.
        assert_eq!(record.lines()[1].total_price, Some(dec!(1.02)));
        assert_eq!(record.lines()[3].total_price, None);
        assert_eq!(record.total_amount(), dec!(59.01));
        assert_eq!(record.status(), DocumentStatus::Draft);
    }

    #[test]
    fn create_rejects_empty_and_non_positive_lines() {
        assert!(PurchaseRecord::create(draft(vec![]), Utc::now()).is_err());

        let zero = PurchaseLineInput::new(ItemId::new(), LocationId::new(), Decimal::ZERO);
        match PurchaseRecord::create(draft(vec![zero]), Utc::now()) {
            Err(DomainError::Validation(_)) => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_prices_and_totals_are_validation_errors() {
        let item = ItemId::new();
        let loc = LocationId::new();
        let huge_price =
            PurchaseLineInput::new(item, loc, dec!(1000)).with_unit_price(Decimal::MAX / dec!(10));
        let line_total =
            PurchaseLineInput::new(item, loc, dec!(1000)).with_unit_price(quantity::MAX_MAGNITUDE);
        let mut full = PurchaseLineInput::new(item, loc, dec!(1));
        full.total_price = Some(quantity::MAX_MAGNITUDE);

        for lines in [vec![huge_price], vec![line_total], vec![full.clone(), full]] {
            match PurchaseRecord::create(draft(lines), Utc::now()) {
                Err(DomainError::Validation(_)) => {}
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn patch_replaces_lines_wholesale() {
        let item = ItemId::new();
        let loc = LocationId::new();
        let mut record = PurchaseRecord::create(
            draft(vec![
                PurchaseLineInput::new(item, loc, dec!(1)).with_unit_price(dec!(5)),
                PurchaseLineInput::new(item, loc, dec!(2)).with_unit_price(dec!(5)),
            ]),
            Utc::now(),
        )
        .unwrap();
        let old_ids: Vec<_> = record.lines().iter().map(|l| l.id).collect();

        let other = ItemId::new();
        let patch = PurchaseRecordPatch {
            lines: Some(vec![
                PurchaseLineInput::new(other, loc, dec!(7)).with_unit_price(dec!(1)),
            ]),
            ..Default::default()
        };
        record.apply_patch(patch, Utc::now()).unwrap();

        assert_eq!(record.lines().len(), 1);
        assert_eq!(record.lines()[0].item_id, other);
        assert!(!old_ids.contains(&record.lines()[0].id));
        assert_eq!(record.total_amount(), dec!(7));
    }

    #[test]
    fn invalid_patch_leaves_record_untouched() {
        let mut record = PurchaseRecord::create(
            draft(vec![PurchaseLineInput::new(
                ItemId::new(),
                LocationId::new(),
                dec!(1),
            )]),
            Utc::now(),
        )
        .unwrap();
        let before = record.clone();

        let patch = PurchaseRecordPatch {
            store_name: Some("Renamed".to_string()),
            lines: Some(vec![]),
            ..Default::default()
        };
        assert!(record.apply_patch(patch, Utc::now()).is_err());
        assert_eq!(record, before);
    }

    #[test]
    fn confirmed_record_rejects_patch() {
        let mut record = PurchaseRecord::create(
            draft(vec![PurchaseLineInput::new(
                ItemId::new(),
                LocationId::new(),
                dec!(1),
            )]),
            Utc::now(),
        )
        .unwrap();
        let confirmer = UserId::new();
        record
            .mark_confirmed(Some(confirmer), None, Utc::now())
            .unwrap();
        assert_eq!(record.header().confirmed_by, Some(confirmer));
        assert!(record.header().confirmed_at.is_some());

        let err = record
            .apply_patch(PurchaseRecordPatch::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn plan_carries_receipt_metadata() {
        let expiry = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let record = PurchaseRecord::create(
            draft(vec![
                PurchaseLineInput::new(ItemId::new(), LocationId::new(), dec!(4))
                    .with_unit_price(dec!(12))
                    .with_expiry(expiry),
            ]),
            Utc::now(),
        )
        .unwrap();

        let plan = record.plan_confirmation();
        let seed = plan.lines()[0].receipt.clone().unwrap();
        assert_eq!(seed.unit_price, Some(dec!(12)));
        assert_eq!(seed.purchase_date, Some(date()));
        assert_eq!(seed.expiry_date, Some(expiry));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn total_is_sum_of_line_totals(
            lines in prop::collection::vec((1i64..100_000, prop::option::of(0i64..100_000)), 1..12)
        ) {
            let item = ItemId::new();
            let loc = LocationId::new();
            let inputs: Vec<_> = lines
                .iter()
                .map(|(qty, price)| {
                    let mut input = PurchaseLineInput::new(item, loc, Decimal::new(*qty, 2));
                    input.unit_price = price.map(|p| Decimal::new(p, 2));
                    input
                })
                .collect();

            let record = PurchaseRecord::create(draft(inputs), Utc::now()).unwrap();
            let expected: Decimal = record.lines().iter().filter_map(|l| l.total_price).sum();
            prop_assert_eq!(record.total_amount(), quantity::round(expected));
            prop_assert!(record.total_amount() >= Decimal::ZERO);
        }
    }
}
