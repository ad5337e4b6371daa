#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use stockkeep_core::{ItemId, LocationId, StockKey, UserId};
use stockkeep_documents::{
    NewPurchaseRecord, NewUsageRecord, PurchaseLineInput, PurchaseRecord, UsageLineInput,
    UsageRecord, UsageType,
};
use stockkeep_infra::{
    InMemoryInventoryStore, InMemoryReferenceData, InfraConfig, PurchaseConfirmation,
    PurchaseRecords, StockLedger, UsageConfirmation, UsageRecords,
};
use stockkeep_stock::{NewStock, Stock, StockFilter};

pub type Refs = Arc<InMemoryReferenceData>;
pub type Ledger = StockLedger<InMemoryInventoryStore, Refs>;

/// Every service wired to one in-memory store.
pub struct Harness {
    pub store: InMemoryInventoryStore,
    pub refs: Refs,
    pub ledger: Ledger,
    pub purchases: PurchaseRecords<InMemoryInventoryStore, Refs>,
    pub usages: UsageRecords<InMemoryInventoryStore, Refs>,
    pub confirm_purchase: PurchaseConfirmation<InMemoryInventoryStore, Refs>,
    pub confirm_usage: UsageConfirmation<InMemoryInventoryStore, Refs>,
    pub user: UserId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_confirm_timeout(Duration::from_secs(10))
    }

    pub fn with_confirm_timeout(timeout: Duration) -> Self {
        let store = InMemoryInventoryStore::new();
        let refs: Refs = Arc::new(InMemoryReferenceData::new());
        let user = refs.add_user();
        let ledger = StockLedger::new(store.clone(), Arc::clone(&refs));
        let config = InfraConfig {
            confirm_timeout: timeout,
            ..InfraConfig::default()
        };

        Self {
            purchases: PurchaseRecords::new(store.clone(), Arc::clone(&refs)),
            usages: UsageRecords::new(store.clone(), Arc::clone(&refs)),
            confirm_purchase: PurchaseConfirmation::from_config(ledger.clone(), &config),
            confirm_usage: UsageConfirmation::from_config(ledger.clone(), &config),
            ledger,
            store,
            refs,
            user,
        }
    }

    /// A fresh (item, location) pair known to the reference data.
    pub fn pair(&self) -> StockKey {
        StockKey::new(self.refs.add_item(), self.refs.add_location())
    }

    pub async fn stock(&self, key: StockKey, quantity: Decimal) -> Stock {
        self.ledger
            .create_stock(NewStock::new(key.item_id, key.location_id, quantity))
            .await
            .expect("create stock")
    }

    /// Current row for `key`, if any.
    pub async fn find(&self, key: StockKey) -> Option<Stock> {
        let filter = StockFilter {
            item_id: Some(key.item_id),
            location_id: Some(key.location_id),
            low_stock_only: false,
        };
        self.ledger
            .list_stock(&filter)
            .await
            .expect("list stock")
            .into_iter()
            .next()
    }

    pub async fn quantity(&self, key: StockKey) -> Option<Decimal> {
        self.find(key).await.map(|s| s.quantity())
    }

    pub async fn purchase(&self, code: &str, lines: Vec<PurchaseLineInput>) -> PurchaseRecord {
        self.purchases
            .create(NewPurchaseRecord {
                code: code.to_string(),
                created_by: self.user,
                purchase_date: date(2025, 5, 1),
                store_name: None,
                store_type: None,
                remarks: None,
                lines,
            })
            .await
            .expect("create purchase")
    }

    pub async fn usage(&self, code: &str, lines: Vec<UsageLineInput>) -> UsageRecord {
        self.usages
            .create(NewUsageRecord {
                code: code.to_string(),
                created_by: self.user,
                usage_date: date(2025, 5, 2),
                usage_type: UsageType::Daily,
                remarks: None,
                lines,
            })
            .await
            .expect("create usage")
    }
}

pub fn purchase_line(key: StockKey, quantity: Decimal) -> PurchaseLineInput {
    PurchaseLineInput::new(key.item_id, key.location_id, quantity)
}

pub fn usage_line(key: StockKey, quantity: Decimal) -> UsageLineInput {
    UsageLineInput::new(key.item_id, key.location_id, quantity)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn unknown_pair() -> StockKey {
    StockKey::new(ItemId::new(), LocationId::new())
}
